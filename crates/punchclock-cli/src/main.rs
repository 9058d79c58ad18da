use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use punchclock_hw::{Camera, Frame, FrameSource, ReplaySource, DEFAULT_FRAME_TIMEOUT};
use std::path::{Path, PathBuf};
use std::time::Duration;

// A punch waits on a full camera session, so allow well past the daemon's
// session timeout before giving up on the reply.
const METHOD_TIMEOUT: Duration = Duration::from_secs(180);

#[zbus::proxy(
    interface = "io.punchclock.Attendance1",
    default_service = "io.punchclock.Attendance1",
    default_path = "/io/punchclock/Attendance1"
)]
trait Attendance {
    async fn verify_and_commit(&self, identity: &str, lat: f64, lng: f64) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<bool>;
    async fn enroll_from_image(&self, identity: &str, name: &str, path: &str) -> zbus::Result<bool>;
    async fn today(&self, identity: &str) -> zbus::Result<String>;
    async fn history(&self, identity: &str, period: &str, page: u32) -> zbus::Result<String>;
    async fn stats(&self, identity: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "punchclock", about = "Face-verified attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify at the camera and record a punch-in or punch-out
    Punch {
        identity: String,
        /// Latitude of this device (ignored when the terminal has a fixed location)
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude of this device
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
    },
    /// Enroll an identity from a photo
    Enroll {
        identity: String,
        /// Display name used in greetings
        name: String,
        /// Image file containing exactly one face
        image: PathBuf,
    },
    /// Show today's record
    Today { identity: String },
    /// List past records
    History {
        identity: String,
        /// week, month or year
        #[arg(short, long, default_value = "week")]
        period: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show this month's summary
    Stats { identity: String },
    /// Stop the session in progress
    Cancel,
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
        /// Save the last captured frame as an image
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Inspect a recorded frame directory instead of a camera
        #[arg(long)]
        replay: Option<PathBuf>,
    },
}

async fn connect(session: bool) -> Result<AttendanceProxy<'static>> {
    tracing::debug!(session, "connecting to punchclockd");
    let builder = if session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let conn = builder
        .method_timeout(METHOD_TIMEOUT)
        .build()
        .await
        .context("connecting to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("punchclockd is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn punch(proxy: &AttendanceProxy<'_>, identity: &str, lat: Option<f64>, lng: Option<f64>) -> Result<()> {
    // Missing coordinates are sent as NaN; the daemon treats them as unknown.
    let lat = lat.unwrap_or(f64::NAN);
    let lng = lng.unwrap_or(f64::NAN);

    println!("Look at the camera...");
    let raw = tokio::select! {
        reply = proxy.verify_and_commit(identity, lat, lng) => reply?,
        _ = tokio::signal::ctrl_c() => {
            proxy.cancel().await?;
            bail!("cancelled");
        }
    };

    let response: serde_json::Value = serde_json::from_str(&raw).context("daemon returned invalid JSON")?;
    if let Some(message) = response.get("message").and_then(|m| m.as_str()) {
        println!("{message}");
    }
    if response.get("outcome").and_then(|o| o.as_str()) != Some("SUCCESS") {
        std::process::exit(1);
    }
    Ok(())
}

/// Print per-frame statistics for a source and return the last frame seen.
fn inspect_frames(source: &mut dyn FrameSource, limit: usize) -> Result<Option<Frame>> {
    let mut last = None;
    let mut dark = 0;
    for i in 0..limit {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if frame.is_dark {
            dark += 1;
        }
        println!(
            "  frame {i:>3}: seq={} {}x{} brightness={:.1}{}",
            frame.sequence,
            frame.width,
            frame.height,
            frame.avg_brightness(),
            if frame.is_dark { " (dark)" } else { "" }
        );
        last = Some(frame);
    }
    println!("{dark} dark frame(s) skipped by verification");
    Ok(last)
}

fn save_snapshot(frame: &Frame, path: &Path) -> Result<()> {
    let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("frame buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("saving snapshot to {}", path.display()))?;
    println!("Snapshot saved to {}", path.display());
    Ok(())
}

fn diagnostics(device: &str, frames: usize, snapshot: Option<&Path>, replay: Option<&Path>) -> Result<()> {
    let last = if let Some(dir) = replay {
        let mut source = ReplaySource::from_dir(dir)?;
        println!("Replaying {} frame(s) from {}", source.remaining(), dir.display());
        inspect_frames(&mut source, frames)?
    } else {
        let devices = Camera::list_devices();
        if devices.is_empty() {
            println!("No V4L2 capture devices found");
        }
        for d in &devices {
            println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
        }

        let camera = Camera::open(device, 640, 480)?;
        println!("Opened {} at {}x{}", camera.device_path, camera.width, camera.height);
        let mut stream = camera.stream(DEFAULT_FRAME_TIMEOUT)?;
        inspect_frames(&mut stream, frames)?
    };

    if let (Some(frame), Some(path)) = (last.as_ref(), snapshot) {
        save_snapshot(frame, path)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let session = cli.session;

    match cli.command {
        Commands::Punch { identity, lat, lng } => {
            let proxy = connect(session).await?;
            punch(&proxy, &identity, lat, lng).await?;
        }
        Commands::Enroll { identity, name, image } => {
            // The daemon opens the file, so hand it an absolute path.
            let path = std::fs::canonicalize(&image)
                .with_context(|| format!("{} not found", image.display()))?;
            let proxy = connect(session).await?;
            proxy
                .enroll_from_image(&identity, &name, &path.to_string_lossy())
                .await?;
            println!("Enrolled '{identity}' as {name}");
        }
        Commands::Today { identity } => {
            let raw = connect(session).await?.today(&identity).await?;
            if raw == "null" {
                println!("No record today for '{identity}'");
            } else {
                print_json(&raw)?;
            }
        }
        Commands::History { identity, period, page } => {
            print_json(&connect(session).await?.history(&identity, &period, page).await?)?
        }
        Commands::Stats { identity } => print_json(&connect(session).await?.stats(&identity).await?)?,
        Commands::Cancel => {
            if connect(session).await?.cancel().await? {
                println!("Session cancelled");
            } else {
                println!("No session in progress");
            }
        }
        Commands::Status => print_json(&connect(session).await?.status().await?)?,
        Commands::Test {
            device,
            frames,
            snapshot,
            replay,
        } => diagnostics(&device, frames, snapshot.as_deref(), replay.as_deref())?,
    }

    Ok(())
}
