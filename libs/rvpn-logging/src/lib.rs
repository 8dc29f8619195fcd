//! Tracing setup shared by `daemon` and `control-plane`. A trimmed version
//! of `firezone-firezone`'s `rust/libs/logging`: an `EnvFilter` built from
//! `RUST_LOG` with a live reload handle, but without Sentry/OpenTelemetry/
//! Windows Event Log export, none of which this system's observability
//! surface needs.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

pub type FilterReloadHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to install global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("failed to apply filter reload: {0}")]
    Reload(#[from] reload::Error),
}

/// Initializes the process-wide subscriber. `default_directive` is used
/// when `RUST_LOG` is unset (e.g. `"rvpn_daemon=info,warn"`).
pub fn init(default_directive: &str) -> Result<FilterReloadHandle, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter, handle) = reload::Layer::new(filter);

    let fmt_layer = fmt::layer().with_target(true).with_level(true);

    Registry::default().with(filter).with(fmt_layer).try_init()?;

    Ok(handle)
}

/// Replaces the active filter at runtime, backing the daemon's
/// `SetState`-adjacent log-level control.
pub fn set_filter(handle: &FilterReloadHandle, directive: &str) -> Result<(), LoggingError> {
    let new_filter = EnvFilter::new(directive);
    handle.reload(new_filter)?;
    Ok(())
}
