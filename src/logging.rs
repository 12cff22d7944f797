//! Session log file.
//!
//! Installed once by `cli::run` and torn down through the returned guard.

use crate::model::SessionConfig;
use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "session.log";

/// Logs the end of the session when dropped.
#[derive(Debug)]
pub struct LogGuard {
    path: Option<PathBuf>,
    started: Instant,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if self.path.is_some() {
            info!(elapsed_s = self.started.elapsed().as_secs(), "session ended");
        }
    }
}

fn open_log(dir: &Path) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create data directory {}", dir.display()))?;
    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok((path, file))
}

fn directive(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))
}

pub fn init(cfg: &SessionConfig) -> Result<LogGuard> {
    let started = Instant::now();
    if !cfg.log_to_file {
        return Ok(LogGuard { path: None, started });
    }

    let (path, file) = open_log(&cfg.data_dir)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => directive(&cfg.log_level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    info!(version = env!("CARGO_PKG_VERSION"), log = %path.display(), "session started");
    Ok(LogGuard {
        path: Some(path),
        started,
    })
}
