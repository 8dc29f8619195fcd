//! OS-specific directory resolution for the daemon's persisted local state
//! and log files. Mirrors the `dirs`-crate usage `device_id.rs` relies on,
//! computing a product-scoped path rather than hard-coding
//! `~/.config/firezone`-style strings inline.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum KnownDirsError {
    #[error("could not determine the platform config directory")]
    NoConfigDir,
    #[error("could not determine the platform log directory")]
    NoLogDir,
    #[error("failed to create directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const PRODUCT_DIR: &str = "rvpn";

/// Directory holding `daemon_state.json`, created if absent.
pub fn daemon_config_dir() -> Result<PathBuf, KnownDirsError> {
    let base = system_config_dir()?.join(PRODUCT_DIR);
    ensure_dir(base)
}

pub fn daemon_state_file() -> Result<PathBuf, KnownDirsError> {
    Ok(daemon_config_dir()?.join("daemon_state.json"))
}

pub fn daemon_log_dir() -> Result<PathBuf, KnownDirsError> {
    let base = system_log_dir()?.join(PRODUCT_DIR);
    ensure_dir(base)
}

#[cfg(target_os = "linux")]
fn system_config_dir() -> Result<PathBuf, KnownDirsError> {
    // Privileged daemon: prefer /etc over the invoking user's XDG config dir.
    Ok(PathBuf::from("/etc"))
}

#[cfg(target_os = "macos")]
fn system_config_dir() -> Result<PathBuf, KnownDirsError> {
    Ok(PathBuf::from("/Library/Application Support"))
}

#[cfg(target_os = "windows")]
fn system_config_dir() -> Result<PathBuf, KnownDirsError> {
    dirs::data_local_dir().ok_or(KnownDirsError::NoConfigDir)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn system_config_dir() -> Result<PathBuf, KnownDirsError> {
    dirs::config_dir().ok_or(KnownDirsError::NoConfigDir)
}

fn system_log_dir() -> Result<PathBuf, KnownDirsError> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/log"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        dirs::cache_dir().ok_or(KnownDirsError::NoLogDir)
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, KnownDirsError> {
    std::fs::create_dir_all(&path).map_err(|source| KnownDirsError::Create {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
