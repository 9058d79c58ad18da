use chrono::{DateTime, FixedOffset};
use punchclock_core::Coordinates;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::pipeline::{self, PipelineError};
use crate::store::{AttendanceStore, HistoryPeriod, StoreError};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub store: AttendanceStore,
}

/// D-Bus interface for the attendance daemon.
///
/// Bus name: io.punchclock.Attendance1
/// Object path: /io/punchclock/Attendance1
pub struct AttendanceService {
    pub state: Arc<Mutex<AppState>>,
}

fn now() -> DateTime<FixedOffset> {
    chrono::Local::now().fixed_offset()
}

/// Location used for a punch: the terminal's own, if configured, otherwise
/// the caller's. Unusable caller coordinates resolve to `None`.
fn resolve_location(terminal: Option<Coordinates>, lat: f64, lng: f64) -> Option<Coordinates> {
    terminal.or_else(|| Coordinates::checked(lat, lng))
}

fn store_failure(e: StoreError) -> zbus::fdo::Error {
    tracing::error!(error = %e, "store operation failed");
    zbus::fdo::Error::Failed(format!("store: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Enrollment input problems are the caller's to fix; everything else is a
/// daemon-side resource fault.
fn enroll_failure(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Image(_)
        | EngineError::ImageIo(_)
        | EngineError::ImageTooLarge { .. }
        | EngineError::ImageTooSmall { .. }
        | EngineError::NoFaceDetected
        | EngineError::MultipleFaces(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => {
            tracing::error!(error = %other, "enroll: engine failure");
            zbus::fdo::Error::Failed(format!("resource: {other}"))
        }
    }
}

#[interface(name = "io.punchclock.Attendance1")]
impl AttendanceService {
    /// Verify the person at the camera as `identity` and record the punch.
    ///
    /// Returns a JSON `VerifyResponse`. Faults (missing settings, storage,
    /// camera or model failures) come back as D-Bus errors prefixed with
    /// their class.
    async fn verify_and_commit(&self, identity: &str, lat: f64, lng: f64) -> zbus::fdo::Result<String> {
        tracing::info!(user = identity, "verify requested");

        // Copy values while holding lock, then release
        let (engine, store, location) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                state.store.clone(),
                resolve_location(state.config.terminal_location, lat, lng),
            )
        };

        let response = pipeline::verify_and_commit(&store, &engine, identity, location, now)
            .await
            .map_err(|e: PipelineError| {
                tracing::error!(user = identity, error = %e, "verify failed");
                zbus::fdo::Error::Failed(format!("{}: {e}", e.kind()))
            })?;

        to_json(&response)
    }

    /// Stop the session in progress, if any. Returns whether one was running.
    async fn cancel(&self) -> zbus::fdo::Result<bool> {
        let engine = self.state.lock().await.engine.clone();
        let running = engine.cancel();
        tracing::info!(running, "cancel requested");
        Ok(running)
    }

    /// Enroll (or re-enroll) `identity` from a photo on the daemon's filesystem.
    async fn enroll_from_image(&self, identity: &str, name: &str, path: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(user = identity, path, "enroll requested");
        if identity.trim().is_empty() || name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "identity and name must not be empty".into(),
            ));
        }

        let (engine, store) = {
            let state = self.state.lock().await;
            (state.engine.clone(), state.store.clone())
        };

        let descriptor = engine
            .enroll_from_image(Path::new(path))
            .await
            .map_err(enroll_failure)?;

        store
            .enroll(identity, name.trim(), &descriptor)
            .await
            .map_err(store_failure)?;

        tracing::info!(user = identity, dim = descriptor.dim(), "enrolled successfully");
        Ok(true)
    }

    /// Today's record for `identity` as JSON, or `null`.
    async fn today(&self, identity: &str) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let record = store
            .record_for(identity, now().date_naive())
            .await
            .map_err(store_failure)?;
        to_json(&record)
    }

    /// One page of `identity`'s records for "week", "month" or "year".
    async fn history(&self, identity: &str, period: &str, page: u32) -> zbus::fdo::Result<String> {
        let period = HistoryPeriod::parse(period).ok_or_else(|| {
            zbus::fdo::Error::InvalidArgs(format!("unknown period '{period}' (week, month, year)"))
        })?;
        let store = self.state.lock().await.store.clone();
        let records = store
            .history(identity, period, page, now().date_naive())
            .await
            .map_err(store_failure)?;
        to_json(&records)
    }

    /// Summary of the current month for `identity`.
    async fn stats(&self, identity: &str) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let stats = store
            .monthly_stats(identity, now().date_naive())
            .await
            .map_err(store_failure)?;
        to_json(&stats)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (engine, store, camera, terminal_location) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                state.store.clone(),
                state.config.camera_device.clone(),
                state.config.terminal_location,
            )
        };

        let enrolled = store.count_identities().await.map_err(store_failure)?;
        let settings_configured = match store.load_settings().await {
            Ok(_) => true,
            Err(StoreError::SettingsMissing | StoreError::InvalidSettings(_)) => false,
            Err(e) => return Err(store_failure(e)),
        };

        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": camera,
            "busy": engine.is_busy(),
            "descriptor_dim": engine.descriptor_dim(),
            "identities_enrolled": enrolled,
            "settings_configured": settings_configured,
            "terminal_location": terminal_location,
        }))
    }
}
