//! Application directories.
//!
//! Bots normally run in containers where the platform dirs are meaningless,
//! so an explicit `MEETCAP_DATA_DIR` always wins over the XDG defaults.

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "meetcap";
const DATA_DIR_ENV: &str = "MEETCAP_DATA_DIR";

pub fn config_file() -> Result<PathBuf> {
    let base = dirs::config_dir().context("No config directory on this platform")?;
    Ok(base.join(APP_DIR).join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .map(|base| base.join(APP_DIR))
        .context("No data directory on this platform")
}

/// Root under which each recording session lays out its working directories.
pub fn recordings_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("recordings"))
}
