//! Verification settings: one immutable value per session.

use crate::liveness::DEFAULT_BLINK_THRESHOLD;
use crate::types::Coordinates;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("{field} must be a positive finite number, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("office coordinates out of range: ({lat}, {lng})")]
    BadCoordinates { lat: f64, lng: f64 },
}

/// Thresholds and office parameters that gate one verification session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSettings {
    /// Geofence reference point.
    pub office: Coordinates,
    /// Allowed radius around `office`, metres.
    pub radius_m: f64,
    /// Punch-ins at or after this local time of day are late.
    #[serde(with = "time_of_day")]
    pub late_cutoff: NaiveTime,
    /// Working hours beyond this count as overtime.
    pub mandatory_hours: f64,
    /// Descriptor distance below which a face matches.
    pub match_threshold: f32,
    /// Mean eye aspect ratio below which the eyes count as closed.
    #[serde(default = "default_blink_threshold")]
    pub blink_threshold: f32,
    /// Consecutive closed-eye frames that make a blink.
    #[serde(default = "default_blink_frames")]
    pub blink_consecutive_frames: u32,
}

fn default_blink_threshold() -> f32 {
    DEFAULT_BLINK_THRESHOLD
}

fn default_blink_frames() -> u32 {
    2
}

impl VerificationSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if Coordinates::checked(self.office.lat, self.office.lng).is_none() {
            return Err(SettingsError::BadCoordinates {
                lat: self.office.lat,
                lng: self.office.lng,
            });
        }
        let positive = [
            ("radius_m", self.radius_m),
            ("mandatory_hours", self.mandatory_hours),
            ("match_threshold", self.match_threshold as f64),
            ("blink_threshold", self.blink_threshold as f64),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SettingsError::NotPositive { field, value });
            }
        }
        Ok(())
    }
}

/// `"HH:MM"` or `"HH:MM:SS"`.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VerificationSettings {
        VerificationSettings {
            office: Coordinates::new(28.7041, 77.1025),
            radius_m: 200.0,
            late_cutoff: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            mandatory_hours: 8.0,
            match_threshold: 0.45,
            blink_threshold: 0.21,
            blink_consecutive_frames: 2,
        }
    }

    #[test]
    fn test_valid_settings() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_non_positive_thresholds() {
        let mut s = sample();
        s.match_threshold = 0.0;
        assert!(matches!(s.validate(), Err(SettingsError::NotPositive { field: "match_threshold", .. })));

        let mut s = sample();
        s.radius_m = f64::NAN;
        assert!(matches!(s.validate(), Err(SettingsError::NotPositive { field: "radius_m", .. })));
    }

    #[test]
    fn test_rejects_bad_office() {
        let mut s = sample();
        s.office = Coordinates::new(123.0, 0.0);
        assert!(matches!(s.validate(), Err(SettingsError::BadCoordinates { .. })));
    }

    #[test]
    fn test_toml_with_short_cutoff_and_defaults() {
        let src = r#"
            radius_m = 200.0
            late_cutoff = "10:00"
            mandatory_hours = 8.0
            match_threshold = 0.45

            [office]
            lat = 28.7041
            lng = 77.1025
        "#;
        let parsed: VerificationSettings = toml::from_str(src).unwrap();
        assert_eq!(parsed.late_cutoff, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(parsed.blink_threshold, DEFAULT_BLINK_THRESHOLD);
        assert_eq!(parsed.blink_consecutive_frames, 2);
    }

    #[test]
    fn test_json_roundtrip_keeps_cutoff() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"10:00:00\""));
        let back: VerificationSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_time_of_day_parse() {
        assert_eq!(time_of_day::parse("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(time_of_day::parse("09:30:15"), NaiveTime::from_hms_opt(9, 30, 15));
        assert_eq!(time_of_day::parse("9h30"), None);
    }
}
