//! Row types for the tables in `migrations/0001_init.sql`, grounded on
//! `examples/original_source/cmd/control-plane/{db.go,target.go,device.go}`'s
//! table shapes.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Target {
    pub name: String,
    pub owner: String,
    pub network_ip: IpNetwork,
    pub network_cidr: i16,
    pub dns_ip: IpNetwork,
    pub server_pubkey: String,
    pub server_public_ip: Option<IpNetwork>,
    pub server_public_vpn_port: Option<i32>,
    pub server_internal_ip: IpNetwork,
    pub server_internal_cidr: i16,
    pub server_heartbeat: Option<DateTime<Utc>>,
}

impl Target {
    /// `spec.md` §3: "a target is *alive* iff (server pubkey, public IP,
    /// port) are all non-empty AND there is a live serving session in the
    /// Connection Manager." This only checks the persisted half; the
    /// Connection Manager check happens at the call site.
    pub fn has_serve_metadata(&self) -> bool {
        !self.server_pubkey.is_empty()
            && self.server_public_ip.is_some()
            && self.server_public_vpn_port.is_some()
    }

    pub fn network_address(&self) -> Ipv4Addr {
        match self.network_ip.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn server_internal_addr(&self) -> Ipv4Addr {
        match self.server_internal_ip.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Device {
    pub principal: String,
    pub hardware_id: String,
    pub device_id: Uuid,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Connection {
    pub id: Uuid,
    pub target: String,
    pub device_id: Uuid,
    pub pubkey: String,
    pub client_ip: IpNetwork,
    pub client_cidr: i16,
}

impl Connection {
    pub fn client_addr(&self) -> Ipv4Addr {
        match self.client_ip.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Default values for `PUT /api/v1/target/{name}`, per `spec.md` §4.6 and
/// `examples/original_source/cmd/control-plane/target.go`.
pub const DEFAULT_NETWORK_CIDR: i16 = 23;
pub const DEFAULT_DNS_IP: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

/// Every `WirePeer` pushed to a serving session has allowed-ips of exactly
/// this prefix (`spec.md` §4.3 step 2, §8 scenario 1): a single peer's
/// address, never the target's wider `network_cidr`/`client_cidr`.
pub const WIREGUARD_PEER_CIDR: u8 = 32;

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with(pubkey: &str, public_ip: Option<IpNetwork>, port: Option<i32>) -> Target {
        Target {
            name: "t".to_string(),
            owner: "dev@example.com".to_string(),
            network_ip: "10.10.0.0".parse().unwrap(),
            network_cidr: DEFAULT_NETWORK_CIDR,
            dns_ip: "1.1.1.1".parse().unwrap(),
            server_pubkey: pubkey.to_string(),
            server_public_ip: public_ip,
            server_public_vpn_port: port,
            server_internal_ip: "10.10.0.1".parse().unwrap(),
            server_internal_cidr: DEFAULT_NETWORK_CIDR,
            server_heartbeat: None,
        }
    }

    #[test]
    fn wireguard_peer_cidr_is_a_single_address() {
        assert_eq!(WIREGUARD_PEER_CIDR, 32);
    }

    #[test]
    fn has_serve_metadata_requires_pubkey_ip_and_port() {
        let complete = target_with("pk", Some("1.2.3.4".parse().unwrap()), Some(51820));
        assert!(complete.has_serve_metadata());

        let no_pubkey = target_with("", Some("1.2.3.4".parse().unwrap()), Some(51820));
        assert!(!no_pubkey.has_serve_metadata());

        let no_port = target_with("pk", Some("1.2.3.4".parse().unwrap()), None);
        assert!(!no_port.has_serve_metadata());
    }
}
