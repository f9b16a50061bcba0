use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "prayatna.log";
const DEFAULT_FILTER: &str = "prayatna_sessions=info";

/// Installs the global subscriber writing to `<logs_dir>/prayatna.log`.
///
/// `RUST_LOG` overrides the default filter. Returns `false` when a subscriber
/// was already installed, which leaves that one in place.
pub fn init_tracing(logs_dir: &Path) -> Result<bool, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(logs_dir))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

pub fn log_file_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(LOG_FILE_NAME)
}
