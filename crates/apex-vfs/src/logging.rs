//! Diagnostic log setup
//!
//! Library code only emits `tracing` events. Hosts that want the project's
//! `log.txt` populated call [`init_project_logging`] once at startup.

use crate::{LOG_FILE, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global subscriber writing to stderr and to `<project_dir>/log.txt`
///
/// The filter comes from `RUST_LOG`, falling back to `default_filter`.
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init_project_logging(project_dir: &Path, default_filter: &str) -> Result<bool> {
    std::fs::create_dir_all(project_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(project_dir.join(LOG_FILE))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Arc::new(file)),
        )
        .try_init()
        .is_ok();
    Ok(installed)
}
