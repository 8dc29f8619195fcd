//! Control-plane side of the bidirectional JSON-RPC session (`spec.md`
//! §4.2, §4.3). The control plane is the caller for the prescribed method
//! sequence; the daemon is caller only for `device_heartbeat`. Grounded on
//! `examples/original_source/cmd/control-plane/{device_connect.go,
//! device_serve.go}`'s two WS entry points, reimplemented on an axum
//! `WebSocket` instead of fiber + `gorilla/websocket`.

use std::net::Ipv4Addr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rvpn_protocol::jsonrpc::{ProtocolError, Request, RequestId, RequestIdGenerator, Response};
use rvpn_protocol::methods::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::connection_manager::{OutboundCall, SessionHandle};
use crate::db;
use crate::models::WIREGUARD_PEER_CIDR;
use crate::AppState;

/// Daemon WS sessions go stale after 3 minutes of silence, per `spec.md`
/// §4.2 ("stale timeout of 3 minutes" in the source's `blockUntilStale`).
const STALE_THRESHOLD: Duration = Duration::from_secs(180);

/// First message on a raw WS connection is always the bearer device
/// token, sent as plain text before any JSON-RPC framing begins —
/// mirrors the source's "we first wait for the server to send their
/// deviceToken" step.
async fn read_device_token(socket: &mut WebSocket) -> Option<String> {
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => Some(text.to_string()),
        _ => None,
    }
}

async fn call<P: Serialize, R: DeserializeOwned>(
    socket: &mut WebSocket,
    ids: &RequestIdGenerator,
    method: &str,
    params: P,
) -> Result<R, ProtocolError> {
    let id = ids.next();
    let request = Request::new(id, method, params);
    let text = serde_json::to_string(&request)?;
    socket.send(Message::Text(text.into())).await.map_err(|_| ProtocolError::Closed)?;

    loop {
        let msg = timeout(STALE_THRESHOLD, socket.next())
            .await
            .map_err(|_| ProtocolError::Closed)?
            .ok_or(ProtocolError::Closed)?
            .map_err(|_| ProtocolError::Closed)?;
        let Message::Text(text) = msg else { continue };
        let response: Response = serde_json::from_str(&text)?;
        if response.id != id {
            continue;
        }
        return match response.outcome {
            rvpn_protocol::jsonrpc::Outcome::Ok { result } => {
                Ok(serde_json::from_value(result)?)
            }
            rvpn_protocol::jsonrpc::Outcome::Err { error } => Err(ProtocolError::RemoteError {
                method: method.to_string(),
                message: error.message,
            }),
        };
    }
}

/// `connect` flow: ensure a connection row exists (allocating an IP if
/// this is the device's first time connecting to this target), then
/// instruct the device to `connect_server` against the target's current
/// serving metadata.
pub async fn handle_connect_session(mut socket: WebSocket, target_name: String, state: AppState) {
    let ids = RequestIdGenerator::default();

    let Some(token) = read_device_token(&mut socket).await else {
        return;
    };
    let Ok(claims) = crate::auth::verify(&state.jwt_secret, &token) else {
        tracing::warn!(target = %target_name, "rejected connect session: invalid device token");
        return;
    };
    let Some(device_id) = claims.device else {
        tracing::warn!(target = %target_name, "rejected connect session: not a device token");
        return;
    };

    let Ok(Some(target)) = db::get_target(&state.pool, &target_name).await else {
        tracing::warn!(target = %target_name, "connect session for unknown target");
        return;
    };
    let Ok(Some(device)) = db::get_device_by_id(&state.pool, device_id).await else {
        tracing::warn!(target = %target_name, "connect session for unknown device");
        return;
    };
    if !matches!(db::is_authorized(&state.pool, &target, &device.principal).await, Ok(true)) {
        tracing::warn!(target = %target_name, principal = %device.principal, "connect session not authorized");
        return;
    }

    // Step 4: the target must have a live serving session before a client
    // is allowed to proceed.
    if !target.has_serve_metadata() || !state.connections.is_alive(&target_name) {
        tracing::info!(target = %target_name, "connect session: target not currently alive");
        return;
    }

    // Step 5: always ask the client for its current pubkey, whether or not
    // a connection row already exists for it.
    let Ok(info) = call::<_, GetClientInformationResult>(
        &mut socket,
        &ids,
        GET_CLIENT_INFORMATION,
        GetClientInformationParams::default(),
    )
    .await
    else {
        return;
    };

    // Step 6: resolve or create the Connection row, tracking whether the
    // serving session's peer set needs to be updated.
    let existing = db::get_connection_by_device(&state.pool, &target_name, device_id)
        .await
        .ok()
        .flatten();

    let (connection, append_peer) = match existing {
        Some(conn) if conn.pubkey == info.public_key => (conn, false),
        Some(conn) => {
            if db::update_connection_pubkey(&state.pool, conn.id, &info.public_key).await.is_err() {
                return;
            }
            (
                crate::models::Connection {
                    pubkey: info.public_key.clone(),
                    ..conn
                },
                true,
            )
        }
        None => {
            match crate::allocator::allocate_connection(&state.pool, &target, device_id, &info.public_key).await {
                Ok(conn) => (conn, true),
                Err(e) => {
                    tracing::error!(target = %target_name, error = %e, "ip allocation failed");
                    return;
                }
            }
        }
    };

    // Step 7: push the updated peer to whoever is currently serving this
    // target.
    if append_peer {
        if let Some(serving) = state.connections.serving_session(&target_name) {
            let peer = WirePeer {
                public_key: connection.pubkey.clone(),
                allowed_ip: connection.client_addr(),
                allowed_cidr: WIREGUARD_PEER_CIDR,
            };
            let request = Request::new(
                ids.next(),
                APPEND_VPN_PEERS,
                AppendVpnPeersParams { peers: vec![peer] },
            );
            if serving.call(request).await.is_none() {
                tracing::warn!(target = %target_name, "failed to push appended peer to serving session");
            }
        }
    }

    // Step 8: issue connect_server on this WS.
    let server_public_ip = match target.server_public_ip.map(|ip| ip.ip()) {
        Some(std::net::IpAddr::V4(v4)) => v4,
        _ => return,
    };
    let dns_ip = match target.dns_ip.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => return,
    };

    let params = ConnectServerParams {
        server_public_key: target.server_pubkey.clone(),
        client_public_key: connection.pubkey.clone(),
        client_internal_ip: connection.client_addr(),
        client_internal_cidr: connection.client_cidr as u8,
        server_public_ip,
        server_public_vpn_port: target.server_public_vpn_port.unwrap_or_default() as u16,
        dns_ip,
        server_internal_ip: target.server_internal_addr(),
    };
    if call::<_, ConnectServerResult>(&mut socket, &ids, CONNECT_SERVER, params).await.is_err() {
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<OutboundCall>(8);
    state
        .connections
        .add_client_session(&target_name, SessionHandle { device_id, tx });

    run_mailbox_and_heartbeat(&mut socket).await;
    drop(rx);
    state.connections.remove_client_session(&target_name, device_id);
}

/// `serve` flow: authenticate via `get_device_auth`, fetch the device's
/// public key and VPN port via `get_serve_information`, persist that as
/// the target's serving metadata, then `serve_vpn` with every existing
/// connection as an initial peer.
pub async fn handle_serve_session(
    mut socket: WebSocket,
    target_name: String,
    state: AppState,
    client_public_ip: Ipv4Addr,
) {
    let ids = RequestIdGenerator::default();

    let Ok(auth) = call::<_, GetDeviceAuthResult>(&mut socket, &ids, GET_DEVICE_AUTH, GetDeviceAuthParams::default())
        .await
    else {
        return;
    };
    let Ok(claims) = crate::auth::verify(&state.jwt_secret, &auth.device_token) else {
        tracing::warn!(target = %target_name, "rejected serve session: invalid device token");
        return;
    };
    let Some(device_id) = claims.device else {
        tracing::warn!(target = %target_name, "rejected serve session: not a device token");
        return;
    };

    let Ok(Some(target)) = db::get_target(&state.pool, &target_name).await else {
        tracing::warn!(target = %target_name, "serve session for unknown target");
        return;
    };
    let Ok(Some(device)) = db::get_device_by_id(&state.pool, device_id).await else {
        tracing::warn!(target = %target_name, "serve session for unknown device");
        return;
    };
    if !matches!(db::is_authorized(&state.pool, &target, &device.principal).await, Ok(true)) {
        tracing::warn!(target = %target_name, principal = %device.principal, "serve session not authorized");
        return;
    }

    // Overrides any existing serving session unconditionally: last-writer-wins,
    // per SPEC_FULL.md §6 item 1.
    let Ok(info) = call::<_, GetServeInformationResult>(
        &mut socket,
        &ids,
        GET_SERVE_INFORMATION,
        GetServeInformationParams::default(),
    )
    .await
    else {
        return;
    };

    if db::update_serve_info(
        &state.pool,
        &target_name,
        &info.public_key,
        client_public_ip,
        info.public_vpn_port as i32,
    )
    .await
    .is_err()
    {
        return;
    }

    let connections = db::list_connections_for_target(&state.pool, &target_name)
        .await
        .unwrap_or_default();
    let peers: Vec<WirePeer> = connections
        .iter()
        .map(|c| WirePeer {
            public_key: c.pubkey.clone(),
            allowed_ip: c.client_addr(),
            allowed_cidr: WIREGUARD_PEER_CIDR,
        })
        .collect();

    let params = ServeVpnParams {
        server_public_key: info.public_key,
        server_internal_ip: target.server_internal_addr(),
        server_internal_cidr: target.server_internal_cidr as u8,
        peers,
    };
    if call::<_, ServeVpnResult>(&mut socket, &ids, SERVE_VPN, params).await.is_err() {
        return;
    }

    tracing::info!(target = %target_name, "device now serving target");

    let (tx, mut rx) = tokio::sync::mpsc::channel::<OutboundCall>(8);
    state
        .connections
        .set_serving_session(&target_name, SessionHandle { device_id, tx });

    run_mailbox_and_heartbeat_with_outbound(&mut socket, &mut rx, &state.pool, &target_name).await;
    state.connections.remove_serving_session(&target_name, device_id);
}

/// Keeps a connecting-client session alive, answering only inbound
/// `device_heartbeat` calls (it never receives outbound pushes — only a
/// serving session does, for `append_vpn_peers`/`delete_vpn_peers`).
async fn run_mailbox_and_heartbeat(socket: &mut WebSocket) {
    loop {
        let inbound = timeout(STALE_THRESHOLD, socket.next()).await;
        let Ok(Some(Ok(msg))) = inbound else { break };
        if !reply_if_heartbeat(socket, msg).await {
            break;
        }
    }
}

/// Same as [`run_mailbox_and_heartbeat`] but additionally forwards
/// outbound calls queued on the connection manager's mailbox (peer
/// append/delete pushed to the serving device) and matches their
/// replies back up by request id.
async fn run_mailbox_and_heartbeat_with_outbound(
    socket: &mut WebSocket,
    rx: &mut tokio::sync::mpsc::Receiver<OutboundCall>,
    pool: &sqlx::PgPool,
    target_name: &str,
) {
    use std::collections::HashMap;

    let mut pending: HashMap<RequestId, tokio::sync::oneshot::Sender<Response>> = HashMap::new();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(outbound) = outbound else { break };
                let text = match serde_json::to_string(&outbound.request) {
                    Ok(t) => t,
                    Err(_) => break,
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                pending.insert(outbound.request.id, outbound.reply);
            }
            inbound = timeout(STALE_THRESHOLD, socket.next()) => {
                let Ok(Some(Ok(msg))) = inbound else { break };

                if let Message::Text(text) = &msg {
                    if let Ok(response) = serde_json::from_str::<Response>(text) {
                        if let Some(reply) = pending.remove(&response.id) {
                            let _ = reply.send(response);
                            continue;
                        }
                    }
                }

                if !reply_if_heartbeat(socket, msg).await {
                    break;
                }
                let _ = db::touch_heartbeat(pool, target_name).await;
            }
        }
    }
}

/// If `msg` is a `device_heartbeat` request, answers it and returns
/// `true`. Returns `false` only on a send failure (caller should treat
/// the session as closed); any other message is ignored and also
/// returns `true` so the caller keeps looping.
async fn reply_if_heartbeat(socket: &mut WebSocket, msg: Message) -> bool {
    let Message::Text(text) = msg else { return true };
    let Ok(request) = serde_json::from_str::<Request>(&text) else {
        return true;
    };
    if request.method != DEVICE_HEARTBEAT {
        return true;
    }
    let response = Response::ok(request.id, DeviceHeartbeatResult { success: true });
    let Ok(text) = serde_json::to_string(&response) else {
        return false;
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}
