//! Minimal JSON-RPC 2.0 envelope, shared by both the daemon's local RPC
//! server and the control-plane session transport.
//!
//! Unlike a conventional client/server RPC library, a single WebSocket here
//! carries calls in both directions: the control plane calls into the
//! daemon for most of the method table, and the daemon calls into the
//! control plane for `device_heartbeat`. Both sides therefore need to be
//! able to both send `Request`s and answer them with `Response`s on the same
//! stream, which is why this type does not assume a fixed request/response
//! role.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request ID. The source type is a `u64` on the wire; IDs are
/// chosen by the caller and echoed back unchanged in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic ID generator for the caller side of a session.
#[derive(Debug, Default)]
pub struct RequestIdGenerator(AtomicU64);

impl RequestIdGenerator {
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: impl Serialize) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: method.into(),
            params: Some(serde_json::to_value(params).unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Ok { result: Value },
    Err { error: RpcError },
}

impl Response {
    pub fn ok(id: RequestId, result: impl Serialize) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            outcome: Outcome::Ok {
                result: serde_json::to_value(result).unwrap_or(Value::Null),
            },
        }
    }

    pub fn err(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            outcome: Outcome::Err { error },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const INVALID_PARAMS: i32 = -32602;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Zero-sized marker so `"jsonrpc": "2.0"` round-trips without a `String`
/// allocation in every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s != "2.0" {
            return Err(serde::de::Error::custom("unsupported jsonrpc version"));
        }
        Ok(JsonRpcVersion)
    }
}

/// One frame on the wire: either side may send either variant at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Request(Request),
    Response(Response),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed json-rpc frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("call to {method} returned an error: {message}")]
    RemoteError { method: String, message: String },
    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_string_jsonrpc_version() {
        let request = Request::new(RequestId(1), "connect_server", serde_json::json!({"a": 1}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "connect_server");
    }

    #[test]
    fn request_without_params_omits_the_field() {
        let request = Request {
            jsonrpc: JsonRpcVersion,
            id: RequestId(2),
            method: "get_device_auth".to_string(),
            params: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("params").is_none());
    }

    #[test]
    fn response_round_trips_through_json() {
        let response = Response::ok(RequestId(7), serde_json::json!({"success": true}));
        let text = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.id, RequestId(7));
        assert!(matches!(parsed.outcome, Outcome::Ok { .. }));
    }

    #[test]
    fn error_response_round_trips_with_code_and_message() {
        let response = Response::err(RequestId(3), RpcError::new(RpcError::METHOD_NOT_FOUND, "nope"));
        let text = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&text).unwrap();
        match parsed.outcome {
            Outcome::Err { error } => {
                assert_eq!(error.code, RpcError::METHOD_NOT_FOUND);
                assert_eq!(error.message, "nope");
            }
            Outcome::Ok { .. } => panic!("expected an error outcome"),
        }
    }

    #[test]
    fn rejects_any_jsonrpc_version_other_than_2_0() {
        let text = r#"{"jsonrpc":"1.0","id":1,"method":"device_heartbeat"}"#;
        let parsed: Result<Request, _> = serde_json::from_str(text);
        assert!(parsed.is_err());
    }

    #[test]
    fn request_id_generator_is_monotonic_and_starts_at_zero() {
        let ids = RequestIdGenerator::default();
        assert_eq!(ids.next(), RequestId(0));
        assert_eq!(ids.next(), RequestId(1));
        assert_eq!(ids.next(), RequestId(2));
    }
}
