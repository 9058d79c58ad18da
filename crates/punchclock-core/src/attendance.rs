//! Attendance record state machine: `None -> PunchedIn -> PunchedOut`.
//!
//! [`apply_punch`] is pure. The store calls it inside the transaction that
//! read the existing record, so the decision and the write are atomic.

use crate::settings::VerificationSettings;
use crate::types::Coordinates;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AttendanceError {
    #[error("already punched out today")]
    AlreadyCompleted,
    #[error("punch-out at {punch_out} is not after punch-in at {punch_in}")]
    NonMonotonicClock {
        punch_in: DateTime<FixedOffset>,
        punch_out: DateTime<FixedOffset>,
    },
    #[error("record is for {record}, punch is on {punch}")]
    DateMismatch { record: NaiveDate, punch: NaiveDate },
}

/// A timestamp and where it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PunchEvent {
    pub at: DateTime<FixedOffset>,
    pub location: Coordinates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One identity's attendance on one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_key: String,
    pub date: NaiveDate,
    pub punch_in: PunchEvent,
    pub punch_out: Option<PunchEvent>,
    pub is_late: bool,
    pub status: AttendanceStatus,
    /// Hours between punch-in and punch-out, two decimals. 0 until punch-out.
    pub working_hours: f64,
    pub overtime_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    None,
    PunchedIn,
    PunchedOut,
}

impl AttendanceRecord {
    pub fn state(&self) -> DayState {
        if self.punch_out.is_some() {
            DayState::PunchedOut
        } else {
            DayState::PunchedIn
        }
    }
}

/// State of the day given the (optional) stored record.
pub fn day_state(record: Option<&AttendanceRecord>) -> DayState {
    record.map_or(DayState::None, AttendanceRecord::state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchKind {
    PunchIn,
    PunchOut,
}

impl fmt::Display for PunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PunchKind::PunchIn => "Punch-in",
            PunchKind::PunchOut => "Punch-out",
        })
    }
}

/// The record to write and which edge produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub kind: PunchKind,
    pub record: AttendanceRecord,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Hours from `from` to `to`, rounded to two decimals.
pub fn working_hours(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> f64 {
    round2((to - from).num_milliseconds() as f64 / 3_600_000.0)
}

/// Hours beyond `mandatory`, never negative.
pub fn overtime_hours(working: f64, mandatory: f64) -> f64 {
    round2((working - mandatory).max(0.0))
}

/// Apply one confirmed verification to the day's record.
///
/// `existing` must be the stored record for `identity_key` on the local date
/// of `at`. From `PunchedOut` there is no transition and the record is left
/// untouched.
pub fn apply_punch(
    identity_key: &str,
    existing: Option<&AttendanceRecord>,
    at: DateTime<FixedOffset>,
    location: Coordinates,
    settings: &VerificationSettings,
) -> Result<Transition, AttendanceError> {
    let date = at.date_naive();
    let event = PunchEvent { at, location };

    let Some(current) = existing else {
        let is_late = at.time() >= settings.late_cutoff;
        return Ok(Transition {
            kind: PunchKind::PunchIn,
            record: AttendanceRecord {
                identity_key: identity_key.to_string(),
                date,
                punch_in: event,
                punch_out: None,
                is_late,
                status: AttendanceStatus::Present,
                working_hours: 0.0,
                overtime_hours: 0.0,
            },
        });
    };

    if current.date != date {
        return Err(AttendanceError::DateMismatch {
            record: current.date,
            punch: date,
        });
    }
    if current.state() == DayState::PunchedOut {
        return Err(AttendanceError::AlreadyCompleted);
    }
    if at <= current.punch_in.at {
        return Err(AttendanceError::NonMonotonicClock {
            punch_in: current.punch_in.at,
            punch_out: at,
        });
    }

    let worked = working_hours(current.punch_in.at, at);
    let mut record = current.clone();
    record.punch_out = Some(event);
    record.working_hours = worked;
    record.overtime_hours = overtime_hours(worked, settings.mandatory_hours);
    Ok(Transition {
        kind: PunchKind::PunchOut,
        record,
    })
}
