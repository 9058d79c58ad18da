use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod pipeline;
mod store;

const BUS_NAME: &str = "io.punchclock.Attendance1";
const OBJECT_PATH: &str = "/io/punchclock/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("punchclockd starting");

    let config = config::Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = store::AttendanceStore::open(&config.db_path).await?;
    tracing::info!(db = %config.db_path.display(), "attendance store opened");

    // The settings file, when given, is authoritative and replaces the stored row.
    if let Some(path) = &config.settings_file {
        let settings = config::load_settings_file(path)?;
        store.save_settings(&settings).await?;
        tracing::info!(file = %path.display(), "verification settings seeded");
    } else if let Err(e) = store.load_settings().await {
        tracing::warn!(error = %e, "verification settings unavailable; punches will fail until configured");
    }

    let engine = engine::spawn_engine(&config)?;

    let session_bus = config.session_bus;
    let service = dbus_interface::AttendanceService {
        state: Arc::new(Mutex::new(dbus_interface::AppState {
            config,
            engine,
            store,
        })),
    };

    let builder = if session_bus {
        tracing::warn!("running on the session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = BUS_NAME, "punchclockd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("punchclockd shutting down");

    Ok(())
}
