//! `verify_and_commit`: the single entry point for a punch.
//!
//! settings → identity → template check → geofence → camera session → commit.
//! The camera is only touched once the geofence has passed, and the
//! attendance write is the only side effect.

use chrono::{DateTime, FixedOffset};
use punchclock_core::attendance::{AttendanceRecord, PunchKind};
use punchclock_core::geofence::{great_circle_distance_m, is_within_range};
use punchclock_core::{CancelReason, Coordinates, IdentityTemplate, SessionOutcome, SessionThresholds};
use serde::Serialize;
use std::future::Future;
use thiserror::Error;

use crate::engine::{EngineError, EngineHandle};
use crate::store::{AttendanceStore, CommitOutcome, StoreError};

/// Runs one camera session for a template. Implemented by the engine.
pub trait SessionRunner {
    /// Length of descriptors the recognition model produces.
    fn descriptor_dim(&self) -> usize;

    fn run_session(
        &self,
        template: IdentityTemplate,
        thresholds: SessionThresholds,
    ) -> impl Future<Output = Result<SessionOutcome, EngineError>> + Send;
}

impl SessionRunner for EngineHandle {
    fn descriptor_dim(&self) -> usize {
        EngineHandle::descriptor_dim(self)
    }

    async fn run_session(
        &self,
        template: IdentityTemplate,
        thresholds: SessionThresholds,
    ) -> Result<SessionOutcome, EngineError> {
        EngineHandle::run_session(self, template, thresholds).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyOutcome {
    Success,
    NotEnrolled,
    OutOfRange,
    AlreadyCompleted,
    Cancelled,
}

/// What the caller gets back for a punch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResponse {
    pub outcome: VerifyOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punch: Option<PunchKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub record: Option<AttendanceRecord>,
}

impl VerifyResponse {
    fn rejected(outcome: VerifyOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            punch: None,
            confidence: None,
            record: None,
        }
    }
}

/// Faults that stop the pipeline. Business outcomes are [`VerifyOutcome`]s.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("template for '{identity}' has {template} dimensions, model produces {model}")]
    TemplateDimension {
        identity: String,
        template: usize,
        model: usize,
    },
}

impl PipelineError {
    /// Error class reported to D-Bus callers.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Store(StoreError::SettingsMissing | StoreError::InvalidSettings(_)) => "config",
            PipelineError::TemplateDimension { .. } => "config",
            PipelineError::Store(_) => "store",
            PipelineError::Engine(_) => "resource",
        }
    }
}

/// Verify `identity_key` at `location` and commit the punch.
///
/// `location` is `None` when the caller could not determine it, which fails
/// the geofence. `clock` stamps the commit.
pub async fn verify_and_commit<R, C>(
    store: &AttendanceStore,
    runner: &R,
    identity_key: &str,
    location: Option<Coordinates>,
    clock: C,
) -> Result<VerifyResponse, PipelineError>
where
    R: SessionRunner,
    C: Fn() -> DateTime<FixedOffset>,
{
    let settings = store.load_settings().await?;

    let Some(template) = store.load_identity(identity_key).await? else {
        tracing::warn!(user = identity_key, "verify: not enrolled");
        return Ok(VerifyResponse::rejected(
            VerifyOutcome::NotEnrolled,
            format!("'{identity_key}' is not enrolled."),
        ));
    };

    if template.descriptor.dim() != runner.descriptor_dim() {
        return Err(PipelineError::TemplateDimension {
            identity: identity_key.to_string(),
            template: template.descriptor.dim(),
            model: runner.descriptor_dim(),
        });
    }

    let here = match location {
        Some(c) if is_within_range(Some(c), settings.office, settings.radius_m) => c,
        _ => {
            let distance_m = location.map(|c| great_circle_distance_m(c, settings.office));
            tracing::warn!(user = identity_key, ?distance_m, radius_m = settings.radius_m, "verify: out of range");
            return Ok(VerifyResponse::rejected(
                VerifyOutcome::OutOfRange,
                format!("You are not within {} m of the office.", settings.radius_m),
            ));
        }
    };

    let name = template.display_name.clone();
    let outcome = runner
        .run_session(template, SessionThresholds::from(&settings))
        .await?;

    let confirmation = match outcome {
        SessionOutcome::Confirmed(c) => c,
        SessionOutcome::Cancelled(reason) => {
            tracing::info!(user = identity_key, %reason, "verify: session cancelled");
            return Ok(VerifyResponse::rejected(VerifyOutcome::Cancelled, cancel_message(reason)));
        }
    };

    match store.commit_punch(identity_key, clock(), here, &settings).await? {
        CommitOutcome::Committed(t) => Ok(VerifyResponse {
            outcome: VerifyOutcome::Success,
            message: format!("{} marked. Welcome, {name}!", t.kind),
            punch: Some(t.kind),
            confidence: Some(confirmation.confidence),
            record: Some(t.record),
        }),
        CommitOutcome::AlreadyCompleted(record) => Ok(VerifyResponse {
            outcome: VerifyOutcome::AlreadyCompleted,
            message: "Already punched out today.".to_string(),
            punch: None,
            confidence: Some(confirmation.confidence),
            record: Some(record),
        }),
    }
}

fn cancel_message(reason: CancelReason) -> String {
    match reason {
        CancelReason::Operator => "Verification cancelled.".to_string(),
        CancelReason::Timeout => "Verification timed out.".to_string(),
        CancelReason::EndOfStream => "Camera stream ended before verification completed.".to_string(),
    }
}
