use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::LogConfig;

/// Routes `log` output to a file; the terminal belongs to the UI.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(cfg: &LogConfig) -> Result<Option<PathBuf>> {
    let Some(path) = cfg.file.clone().or_else(default_log_path) else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    let level = if cfg.level.trim().is_empty() {
        "warn"
    } else {
        cfg.level.trim()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper", log::LevelFilter::Warn)
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("logging: install logger")?;

    log::info!("clip-feed {} logging to {}", crate::VERSION, path.display());
    Ok(Some(path))
}

pub fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("clip-feed").join("clip-feed.log"))
}
