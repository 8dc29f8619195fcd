//! `GET /api/v1/target/{name}/serve` and `.../connect` WS upgrades
//! (`spec.md` §4.2, §4.6).

use std::net::{IpAddr, SocketAddr};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::Response;

use crate::{ws_session, AppState};

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| ws_session::handle_connect_session(socket, target, state))
}

pub async fn serve(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(target): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let client_ip = match remote.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
    };
    ws.on_upgrade(move |socket| ws_session::handle_serve_session(socket, target, state, client_ip))
}
