//! Local loopback RPC surface (`spec.md` §4.1, §6) between the daemon and
//! its front-ends (CLI/GUI, out of scope for this repository). The daemon
//! only needs to serve these methods; nothing here assumes a client exists.

use serde::{Deserialize, Serialize};

/// Every local RPC reply is wrapped in this envelope, mirroring the
/// `{success, data, error}` shape `spec.md` §7 mandates for transport-level
/// failures reported to a front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub const METHOD_PING: &str = "ping";
pub const METHOD_STATUS: &str = "status";
pub const METHOD_GET_STATE: &str = "get_state";
pub const METHOD_SET_STATE: &str = "set_state";
pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_DISCONNECT: &str = "disconnect";
pub const METHOD_SERVE: &str = "serve";
pub const METHOD_VERSION: &str = "version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Disconnected,
    Connected,
    Serving,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub profile: String,
    pub device_token: String,
    pub control_plane_ws_url: String,
    #[serde(default)]
    pub opts: ConnectOpts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectOpts {
    /// Additional subnets to route over the tunnel, per the CLI's
    /// `--subnets` flag (the CLI itself is out of scope; this field exists
    /// so the contract is preserved for whichever front-end drives it).
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeRequest {
    pub profile: String,
    pub device_token: String,
    pub control_plane_ws_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: DaemonStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonLocalState {
    pub control_plane_auth: Option<String>,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_omits_the_error_field() {
        let envelope = Envelope::ok(StatusResponse {
            status: DaemonStatus::Connected,
            profile: Some("home".to_string()),
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn fail_envelope_omits_the_data_field() {
        let envelope: Envelope<StatusResponse> = Envelope::fail("wrong status");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("data").is_none());
        assert_eq!(value["error"], "wrong status");
    }

    #[test]
    fn daemon_status_defaults_to_disconnected() {
        assert_eq!(DaemonStatus::default(), DaemonStatus::Disconnected);
    }
}
