//! WireGuard Lifecycle Manager (`spec.md` §4.3). Each OS gets its own
//! concrete implementation behind `cfg(target_os = ...)`, the way the
//! teacher's `tun_device_manager` module is structured — there is no
//! `dyn`-dispatched trait here, just a platform module re-exported under a
//! common name so `daemon` doesn't need `#[cfg]` scattered through it.

pub mod config;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

pub use config::{ClientConf, ServeConf, WgPeer, WireGuardError, HEALTH_PROBE_PORT};

#[cfg(target_os = "linux")]
pub use linux::{DefaultRouteMonitor, LifecycleManager};
#[cfg(target_os = "macos")]
pub use macos::{DefaultRouteMonitor, LifecycleManager};
#[cfg(target_os = "windows")]
pub use windows::{DefaultRouteMonitor, LifecycleManager};

/// Whether this build can act as a serving (gateway) device. `spec.md` §4.3
/// gates `Serve`/`UpdateServeConf` to Linux only.
pub const SERVE_SUPPORTED: bool = cfg!(target_os = "linux");
