use anyhow::Context;
use punchclock_core::{Coordinates, ModelPaths, VerificationSettings};
use std::path::{Path, PathBuf};

/// Daemon configuration, loaded from environment variables.
///
/// Verification thresholds are not here: they live in the database settings
/// row and are re-read for every session.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// A verification session is cancelled after this many seconds.
    pub session_timeout_secs: u64,
    /// Longest wait for a single frame before the camera counts as stalled.
    pub frame_timeout_ms: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilisation).
    pub warmup_frames: usize,
    /// Fixed location of this terminal. When set it replaces caller-supplied
    /// coordinates.
    pub terminal_location: Option<Coordinates>,
    /// TOML file used to seed the settings row at startup.
    pub settings_file: Option<PathBuf>,
    /// Length of the descriptors the recognition model produces.
    pub descriptor_dim: usize,
    /// Minimum detector score for a face to count.
    pub detector_min_score: f32,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `PUNCHCLOCK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("PUNCHCLOCK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| punchclock_core::perception::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("punchclock");

        let db_path = std::env::var("PUNCHCLOCK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            camera_device: std::env::var("PUNCHCLOCK_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_u32("PUNCHCLOCK_CAMERA_WIDTH", 640),
            camera_height: env_u32("PUNCHCLOCK_CAMERA_HEIGHT", 480),
            model_dir,
            db_path,
            session_timeout_secs: env_u64("PUNCHCLOCK_SESSION_TIMEOUT_SECS", 60),
            frame_timeout_ms: env_u64("PUNCHCLOCK_FRAME_TIMEOUT_MS", 2000),
            warmup_frames: env_usize("PUNCHCLOCK_WARMUP_FRAMES", 4),
            terminal_location: parse_location(
                std::env::var("PUNCHCLOCK_TERMINAL_LAT").ok().as_deref(),
                std::env::var("PUNCHCLOCK_TERMINAL_LNG").ok().as_deref(),
            ),
            settings_file: std::env::var("PUNCHCLOCK_SETTINGS_FILE").ok().map(PathBuf::from),
            descriptor_dim: env_usize("PUNCHCLOCK_DESCRIPTOR_DIM", 512),
            detector_min_score: env_f32(
                "PUNCHCLOCK_DETECTOR_MIN_SCORE",
                punchclock_core::detector::DEFAULT_MIN_SCORE,
            ),
            session_bus: std::env::var("PUNCHCLOCK_SESSION_BUS").is_ok(),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

/// Parse and validate a TOML settings file.
pub fn load_settings_file(path: &Path) -> anyhow::Result<VerificationSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    let settings: VerificationSettings =
        toml::from_str(&raw).with_context(|| format!("parsing settings file {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Both halves must be present, numeric and in range.
fn parse_location(lat: Option<&str>, lng: Option<&str>) -> Option<Coordinates> {
    let lat = lat?.trim().parse().ok()?;
    let lng = lng?.trim().parse().ok()?;
    Coordinates::checked(lat, lng)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location(Some("28.7041"), Some(" 77.1025")),
            Some(Coordinates::new(28.7041, 77.1025))
        );
        assert_eq!(parse_location(Some("28.7"), None), None);
        assert_eq!(parse_location(Some("north"), Some("77.1")), None);
        assert_eq!(parse_location(Some("95.0"), Some("77.1")), None);
    }

    #[test]
    fn test_load_settings_file() {
        let dir = std::env::temp_dir().join(format!("punchclock-settings-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("settings.toml");
        std::fs::write(
            &good,
            "radius_m = 200.0\nlate_cutoff = \"10:00\"\nmandatory_hours = 8.0\nmatch_threshold = 0.45\n\n[office]\nlat = 28.7041\nlng = 77.1025\n",
        )
        .unwrap();
        let settings = load_settings_file(&good).unwrap();
        assert_eq!(settings.radius_m, 200.0);
        assert_eq!(settings.blink_consecutive_frames, 2);

        let bad = dir.join("bad.toml");
        std::fs::write(
            &bad,
            "radius_m = 0.0\nlate_cutoff = \"10:00\"\nmandatory_hours = 8.0\nmatch_threshold = 0.45\n\n[office]\nlat = 28.7041\nlng = 77.1025\n",
        )
        .unwrap();
        assert!(load_settings_file(&bad).is_err());
        assert!(load_settings_file(&dir.join("missing.toml")).is_err());

        std::fs::remove_dir_all(dir).ok();
    }
}
