//! The control-plane <-> daemon method table (`spec.md` §6). Method name
//! strings and JSON field names are wire ABI and must not change.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GET_DEVICE_AUTH: &str = "get_device_auth";
pub const GET_CLIENT_INFORMATION: &str = "get_client_information";
pub const GET_SERVE_INFORMATION: &str = "get_serve_information";
pub const CONNECT_SERVER: &str = "connect_server";
pub const SERVE_VPN: &str = "serve_vpn";
pub const APPEND_VPN_PEERS: &str = "append_vpn_peers";
pub const DELETE_VPN_PEERS: &str = "delete_vpn_peers";
pub const DEVICE_HEARTBEAT: &str = "device_heartbeat";

/// A single WireGuard peer as exchanged on the wire for serve/append/delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePeer {
    pub public_key: String,
    pub allowed_ip: Ipv4Addr,
    pub allowed_cidr: u8,
}

// ---- get_device_auth: CP -> daemon, no params ----

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GetDeviceAuthParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDeviceAuthResult {
    pub success: bool,
    pub device_token: String,
}

// ---- get_client_information: CP -> daemon, no params ----

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GetClientInformationParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetClientInformationResult {
    pub success: bool,
    pub public_key: String,
}

// ---- get_serve_information: CP -> daemon, no params ----

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GetServeInformationParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetServeInformationResult {
    pub success: bool,
    pub public_key: String,
    pub public_vpn_port: u16,
}

// ---- connect_server: CP -> daemon ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectServerParams {
    pub server_public_key: String,
    pub client_public_key: String,
    pub client_internal_ip: Ipv4Addr,
    pub client_internal_cidr: u8,
    pub server_public_ip: Ipv4Addr,
    pub server_public_vpn_port: u16,
    pub dns_ip: Ipv4Addr,
    /// The target's tunnel-internal server address, so the daemon can
    /// send its post-connect health probe (`SPEC_FULL.md` §2.3 supplement)
    /// across the tunnel rather than to the public endpoint.
    pub server_internal_ip: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectServerResult {
    pub success: bool,
}

// ---- serve_vpn: CP -> daemon ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeVpnParams {
    pub server_public_key: String,
    pub server_internal_ip: Ipv4Addr,
    pub server_internal_cidr: u8,
    pub peers: Vec<WirePeer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeVpnResult {
    pub success: bool,
}

// ---- append_vpn_peers / delete_vpn_peers: CP -> daemon ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendVpnPeersParams {
    pub peers: Vec<WirePeer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendVpnPeersResult {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVpnPeersParams {
    pub peers: Vec<WirePeer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVpnPeersResult {
    pub success: bool,
}

// ---- device_heartbeat: daemon -> CP ----

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceHeartbeatParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHeartbeatResult {
    pub success: bool,
}

/// Device ID claim carried by a device token, and the device-ID type used
/// across the `devices`/`connections` tables.
pub type DeviceId = Uuid;

#[cfg(test)]
mod tests {
    use super::*;

    /// These strings are wire ABI (`spec.md` §6) and must never change.
    #[test]
    fn method_names_match_the_wire_abi() {
        assert_eq!(GET_DEVICE_AUTH, "get_device_auth");
        assert_eq!(GET_CLIENT_INFORMATION, "get_client_information");
        assert_eq!(GET_SERVE_INFORMATION, "get_serve_information");
        assert_eq!(CONNECT_SERVER, "connect_server");
        assert_eq!(SERVE_VPN, "serve_vpn");
        assert_eq!(APPEND_VPN_PEERS, "append_vpn_peers");
        assert_eq!(DELETE_VPN_PEERS, "delete_vpn_peers");
        assert_eq!(DEVICE_HEARTBEAT, "device_heartbeat");
    }

    #[test]
    fn wire_peer_serializes_ip_as_plain_string() {
        let peer = WirePeer {
            public_key: "abc".to_string(),
            allowed_ip: Ipv4Addr::new(10, 8, 0, 2),
            allowed_cidr: 32,
        };
        let value = serde_json::to_value(&peer).unwrap();
        assert_eq!(value["allowed_ip"], "10.8.0.2");
    }
}
