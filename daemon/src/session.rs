//! Control-Plane Session (`spec.md` §4.2): one long-lived bidirectional
//! JSON-RPC-over-WebSocket channel. Architecturally grounded on
//! `examples/firezone-firezone/rust/libs/connlib/phoenix-channel/src/lib.rs`'s
//! `PhoenixChannel` — exponential-backoff reconnection, a heartbeat
//! interval, pending-request tracking — adapted from Phoenix's topic/event
//! framing to plain JSON-RPC 2.0, and adapted from "daemon is always the
//! caller" to genuinely bidirectional: the control plane calls almost
//! every method in the table, the daemon only calls `device_heartbeat`.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::{Sink, SinkExt, Stream, StreamExt};
use rvpn_protocol::jsonrpc::{Request, RequestIdGenerator, Response, RpcError};
use rvpn_protocol::methods::{
    self, AppendVpnPeersParams, ConnectServerParams, DeleteVpnPeersParams,
    GetClientInformationResult, GetDeviceAuthResult, GetServeInformationResult, ServeVpnParams,
};
use tokio::sync::oneshot;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::actor::{ActorHandle, SessionEvent, SessionEventReply};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const STALE_THRESHOLD: Duration = Duration::from_secs(180);

/// Runs until `shutdown_rx` fires (a `Disconnect` RPC) or the session goes
/// stale. `opened_tx` fires exactly once, the first time the WS opens and
/// the device token is sent, regardless of how many reconnects follow.
pub async fn run(
    ws_url: String,
    device_token: String,
    serve_mode: bool,
    actor: ActorHandle,
    mut shutdown_rx: oneshot::Receiver<()>,
    opened_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut backoff = ExponentialBackoff::default();
    let mut opened_tx = Some(opened_tx);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("session shutdown requested before connect completed");
                return;
            }
            connect_result = tokio_tungstenite::connect_async(&ws_url) => {
                match connect_result {
                    Ok((ws_stream, _response)) => {
                        backoff.reset();
                        let (mut write, mut read) = ws_stream.split();

                        if let Err(e) = write.send(Message::Text(device_token.clone())).await {
                            warn!(error = %e, "failed to send device token");
                            if let Some(tx) = opened_tx.take() {
                                let _ = tx.send(Err(e.to_string()));
                                return;
                            }
                            continue;
                        }

                        if let Some(tx) = opened_tx.take() {
                            let _ = tx.send(Ok(()));
                        }

                        let outcome = run_open_session(
                            &mut write,
                            &mut read,
                            serve_mode,
                            &actor,
                            &mut shutdown_rx,
                        )
                        .await;

                        match outcome {
                            SessionEnd::ShutdownRequested => return,
                            SessionEnd::Lost => {
                                actor.session_event(SessionEvent::SessionLost).await;
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, %ws_url, "control-plane websocket connect failed, retrying");
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        } else {
                            if let Some(tx) = opened_tx.take() {
                                let _ = tx.send(Err("exhausted reconnect attempts".into()));
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    ShutdownRequested,
    Lost,
}

async fn run_open_session(
    write: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    read: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    serve_mode: bool,
    actor: &ActorHandle,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let ids = RequestIdGenerator::default();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut last_activity = tokio::time::Instant::now();

    loop {
        let idle_for = last_activity.elapsed();
        if idle_for > STALE_THRESHOLD {
            warn!(?idle_for, "control-plane session stale, tearing down");
            return SessionEnd::Lost;
        }

        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::ShutdownRequested;
            }
            _ = heartbeat.tick() => {
                let req = Request::new(ids.next(), methods::DEVICE_HEARTBEAT, methods::DeviceHeartbeatParams::default());
                if let Ok(text) = serde_json::to_string(&req) {
                    if write.send(Message::Text(text)).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = tokio::time::Instant::now();
                        handle_inbound(&text, serve_mode, actor, write).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_activity = tokio::time::Instant::now();
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("control-plane closed the session");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }
}

/// Dispatches one inbound frame. Only `Request`s are expected here — the
/// control plane is the caller for every method except `device_heartbeat`,
/// whose `Response` (if any) is simply ignored since heartbeats are
/// fire-and-forget liveness, not state-changing calls.
async fn handle_inbound(
    text: &str,
    serve_mode: bool,
    actor: &ActorHandle,
    write: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    let request: Request = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => return,
    };

    let response = dispatch(request, serve_mode, actor).await;
    if let Ok(reply) = serde_json::to_string(&response) {
        let _ = write.send(Message::Text(reply)).await;
    }
}

async fn dispatch(request: Request, serve_mode: bool, actor: &ActorHandle) -> Response {
    let id = request.id;
    let params = request.params.unwrap_or(serde_json::Value::Null);

    macro_rules! bad_params {
        () => {
            return Response::err(id, RpcError::new(RpcError::INVALID_PARAMS, "bad params"))
        };
    }

    match request.method.as_str() {
        methods::GET_DEVICE_AUTH => {
            let reply = actor.session_event(SessionEvent::GetDeviceAuth).await;
            let SessionEventReply::DeviceAuth { success, device_token } = reply else {
                unreachable!("actor always answers GetDeviceAuth with DeviceAuth")
            };
            Response::ok(id, GetDeviceAuthResult { success, device_token })
        }
        methods::GET_CLIENT_INFORMATION => {
            let reply = actor.session_event(SessionEvent::GetClientInformation).await;
            let SessionEventReply::ClientInformation { success, public_key } = reply else {
                unreachable!()
            };
            Response::ok(id, GetClientInformationResult { success, public_key })
        }
        methods::GET_SERVE_INFORMATION => {
            let reply = actor
                .session_event(SessionEvent::GetServeInformation {
                    public_vpn_port: rvpn_wireguard::config::SERVE_LISTEN_PORT,
                })
                .await;
            let SessionEventReply::ServeInformation { success, public_key } = reply else {
                unreachable!()
            };
            Response::ok(
                id,
                GetServeInformationResult {
                    success,
                    public_key,
                    public_vpn_port: rvpn_wireguard::config::SERVE_LISTEN_PORT,
                },
            )
        }
        methods::CONNECT_SERVER => {
            let Ok(params) = serde_json::from_value::<ConnectServerParams>(params) else {
                bad_params!();
            };
            let reply = actor.session_event(SessionEvent::ConnectServer(params)).await;
            let SessionEventReply::Applied { success } = reply else {
                unreachable!()
            };
            Response::ok(id, methods::ConnectServerResult { success })
        }
        methods::SERVE_VPN => {
            if !serve_mode {
                return Response::ok(id, methods::ServeVpnResult { success: false });
            }
            let Ok(params) = serde_json::from_value::<ServeVpnParams>(params) else {
                bad_params!();
            };
            let reply = actor.session_event(SessionEvent::ServeVpn(params)).await;
            let SessionEventReply::Applied { success } = reply else {
                unreachable!()
            };
            Response::ok(id, methods::ServeVpnResult { success })
        }
        methods::APPEND_VPN_PEERS => {
            let Ok(params) = serde_json::from_value::<AppendVpnPeersParams>(params) else {
                bad_params!();
            };
            let reply = actor.session_event(SessionEvent::AppendPeers(params.peers)).await;
            let SessionEventReply::Applied { success } = reply else {
                unreachable!()
            };
            Response::ok(id, methods::AppendVpnPeersResult { success })
        }
        methods::DELETE_VPN_PEERS => {
            let Ok(params) = serde_json::from_value::<DeleteVpnPeersParams>(params) else {
                bad_params!();
            };
            let reply = actor.session_event(SessionEvent::DeletePeers(params)).await;
            let SessionEventReply::Applied { success } = reply else {
                unreachable!()
            };
            Response::ok(id, methods::DeleteVpnPeersResult { success })
        }
        other => Response::err(
            id,
            RpcError::new(RpcError::METHOD_NOT_FOUND, format!("unknown method {other}")),
        ),
    }
}

