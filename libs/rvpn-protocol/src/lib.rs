//! Wire types shared by `daemon` and `control-plane`: the JSON-RPC 2.0
//! envelope used on the control-plane session, the typed method table for
//! the eight ABI methods, and the local loopback RPC envelope.

pub mod envelope;
pub mod jsonrpc;
pub mod methods;

pub use envelope::Envelope;
pub use jsonrpc::{
    Frame, JsonRpcVersion, ProtocolError, Request, RequestId, RequestIdGenerator, Response,
    RpcError,
};
