//! Configuration types shared by every platform's Lifecycle Manager
//! implementation. Field shapes mirror the wire types in `rvpn-protocol`,
//! but this crate does not depend on it — the daemon is responsible for
//! translating a `connect_server`/`serve_vpn` RPC into these structs, which
//! keeps the OS abstraction free of JSON-RPC concerns (the same separation
//! drawn between `tun_device_manager` and `ipc_service`).

use std::net::Ipv4Addr;

pub const CLIENT_LISTEN_PORT: u16 = 51720;
pub const SERVE_LISTEN_PORT: u16 = 21820;
pub const TUNNEL_MTU: u16 = 1420;
pub const PERSISTENT_KEEPALIVE_SECS: u16 = 20;

/// Well-known UDP port the post-`UpdateClientConf` health probe
/// (`SPEC_FULL.md` §2.3 supplement) sends its single datagram to.
pub const HEALTH_PROBE_PORT: u16 = 51821;

#[cfg(target_os = "linux")]
pub const TUN_NAME: &str = "rvpn0";
#[cfg(target_os = "windows")]
pub const TUN_NAME: &str = "rvpn0";
#[cfg(target_os = "macos")]
pub const TUN_NAME: &str = "utun140";

#[derive(Debug, Clone)]
pub struct WgPeer {
    pub public_key: String,
    pub allowed_ip: Ipv4Addr,
    pub allowed_cidr: u8,
}

/// Everything needed to bring the tunnel up in client (connecting-device)
/// mode, per `spec.md` §4.3 `UpdateClientConf`.
#[derive(Debug, Clone)]
pub struct ClientConf {
    pub private_key: String,
    pub client_internal_ip: Ipv4Addr,
    pub client_internal_cidr: u8,
    pub server_public_key: String,
    pub server_public_ip: Ipv4Addr,
    pub server_public_vpn_port: u16,
    pub dns_ip: Ipv4Addr,
    /// The control plane's own IP, resolved from the session's WS URL —
    /// this also needs a /32 exemption route alongside the server IP.
    pub control_plane_ip: Ipv4Addr,
}

/// Everything needed to bring the tunnel up in serve (gateway) mode, per
/// `spec.md` §4.3 `UpdateServeConf`. Linux-only.
#[derive(Debug, Clone)]
pub struct ServeConf {
    pub private_key: String,
    pub internal_ip: Ipv4Addr,
    pub internal_cidr: u8,
    pub peers: Vec<WgPeer>,
}

#[derive(Debug, thiserror::Error)]
pub enum WireGuardError {
    #[error("creating tun device failed: {0}")]
    TunCreate(String),
    #[error("netlink request failed: {0}")]
    Netlink(String),
    #[error("could not determine the host's default route")]
    NoDefaultRoute,
    #[error("serve is not supported on this platform")]
    ServeUnsupported,
    #[error("iptables command failed: {0}")]
    Iptables(String),
    #[error("wg control command failed: {0}")]
    WgConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
