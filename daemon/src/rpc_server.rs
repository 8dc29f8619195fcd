//! Daemon RPC Server (`spec.md` §4.1): a loopback-only TCP listener on
//! port 52370, newline-delimited JSON-RPC per connection. Grounded on
//! `examples/firezone-firezone/rust/headless-client/src/ipc_service.rs`'s
//! `Handler`/`next_event` dispatch loop, adapted from named-pipe IPC to
//! `tokio::net::TcpListener` with `tokio_util::codec::LinesCodec` — the
//! framing unit already pulled in via the `codec` feature of
//! `tokio-util`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures::SinkExt;
use rvpn_protocol::envelope::{self, ConnectRequest, Envelope, ServeRequest};
use rvpn_protocol::jsonrpc::{Request, Response, RpcError};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{error, info, warn};

use crate::actor::ActorHandle;

pub const LOCAL_RPC_PORT: u16 = 52370;

pub async fn serve(actor: ActorHandle) -> anyhow::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), LOCAL_RPC_PORT);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "daemon local rpc server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let actor = actor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, actor).await {
                warn!(error = %e, %peer, "local rpc connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, actor: ActorHandle) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new());

    while let Some(line) = framed.next().await {
        let line = line?;
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "malformed local rpc request");
                continue;
            }
        };

        let id = request.id;
        let response = dispatch(request, &actor).await;
        let text = serde_json::to_string(&response)?;
        framed.send(text).await?;
        let _ = id;
    }
    Ok(())
}

async fn dispatch(request: Request, actor: &ActorHandle) -> Response {
    let id = request.id;
    let params = request.params.unwrap_or(serde_json::Value::Null);

    match request.method.as_str() {
        envelope::METHOD_PING => {
            actor.ping().await;
            Response::ok(id, Envelope::ok(()))
        }
        envelope::METHOD_STATUS => {
            let status = actor.status().await;
            Response::ok(id, Envelope::ok(status))
        }
        envelope::METHOD_VERSION => {
            let version = actor.version().await;
            Response::ok(
                id,
                Envelope::ok(envelope::VersionResponse { version }),
            )
        }
        envelope::METHOD_GET_STATE => {
            let state = actor.get_state().await;
            Response::ok(id, Envelope::ok(state))
        }
        envelope::METHOD_SET_STATE => {
            let Ok(state) = serde_json::from_value(params) else {
                return bad_params(id);
            };
            match actor.set_state(state).await {
                Ok(()) => Response::ok(id, Envelope::<()>::ok(())),
                Err(e) => Response::ok(id, Envelope::<()>::fail(e.to_string())),
            }
        }
        envelope::METHOD_CONNECT => {
            let Ok(req) = serde_json::from_value::<ConnectRequest>(params) else {
                return bad_params(id);
            };
            match actor.connect(req).await {
                Ok(()) => Response::ok(id, Envelope::<()>::ok(())),
                Err(e) => Response::ok(id, Envelope::<()>::fail(e.to_string())),
            }
        }
        envelope::METHOD_DISCONNECT => match actor.disconnect().await {
            Ok(()) => Response::ok(id, Envelope::<()>::ok(())),
            Err(e) => Response::ok(id, Envelope::<()>::fail(e.to_string())),
        },
        envelope::METHOD_SERVE => {
            let Ok(req) = serde_json::from_value::<ServeRequest>(params) else {
                return bad_params(id);
            };
            match actor.serve(req).await {
                Ok(()) => Response::ok(id, Envelope::<()>::ok(())),
                Err(e) => Response::ok(id, Envelope::<()>::fail(e.to_string())),
            }
        }
        other => Response::err(
            id,
            RpcError::new(RpcError::METHOD_NOT_FOUND, format!("unknown method {other}")),
        ),
    }
}

fn bad_params(id: rvpn_protocol::jsonrpc::RequestId) -> Response {
    Response::err(id, RpcError::new(RpcError::INVALID_PARAMS, "bad params"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_rpc_port_matches_spec() {
        assert_eq!(LOCAL_RPC_PORT, 52370);
    }
}
