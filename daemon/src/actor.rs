//! The daemon's single actor. Owns every piece of mutable runtime state —
//! status, local state, the active WireGuard lifecycle manager, the active
//! control-plane session's shutdown handle — and is reachable only through
//! a mailbox (`tokio::sync::mpsc`). Both the local RPC server
//! (`rpc_server.rs`) and the control-plane session (`session.rs`) post
//! `Command`s here rather than taking a lock, per `spec.md` §9 "Actor vs
//! lock for the daemon": the state machine in §4.3 collapses to a match on
//! (current state, incoming message).

use std::net::Ipv4Addr;
use std::time::Duration;

use rvpn_protocol::envelope::{
    ConnectRequest, DaemonLocalState, DaemonStatus, ServeRequest, StatusResponse,
};
use rvpn_protocol::methods::{
    ConnectServerParams, DeleteVpnPeersParams, ServeVpnParams, WirePeer,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::local_state;
use crate::session;

#[cfg(target_os = "linux")]
type PlatformLifecycleManager = rvpn_wireguard::linux::LifecycleManager;
#[cfg(target_os = "macos")]
type PlatformLifecycleManager = rvpn_wireguard::macos::LifecycleManager;
#[cfg(target_os = "windows")]
type PlatformLifecycleManager = rvpn_wireguard::windows::LifecycleManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the default-route ticker polls for an interface change while
/// Connected (§9 Open Question "default-interface change mid-session").
const DEFAULT_ROUTE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What the control-plane session asks the actor to do on its behalf, per
/// `spec.md` §4.2's method table (every row except `device_heartbeat`,
/// which only needs the actor for staleness bookkeeping).
#[derive(Debug)]
pub enum SessionEvent {
    GetDeviceAuth,
    GetClientInformation,
    GetServeInformation { public_vpn_port: u16 },
    ConnectServer(ConnectServerParams),
    ServeVpn(ServeVpnParams),
    AppendPeers(Vec<WirePeer>),
    DeletePeers(DeleteVpnPeersParams),
    /// The session detected a 3-minute heartbeat staleness or the socket
    /// dropped; the actor must fall back to Disconnected.
    SessionLost,
}

#[derive(Debug)]
pub enum SessionEventReply {
    DeviceAuth { success: bool, device_token: String },
    ClientInformation { success: bool, public_key: String },
    ServeInformation { success: bool, public_key: String },
    Applied { success: bool },
    Ack,
}

pub enum Command {
    Ping(oneshot::Sender<()>),
    Status(oneshot::Sender<StatusResponse>),
    GetState(oneshot::Sender<DaemonLocalState>),
    SetState(DaemonLocalState, oneshot::Sender<Result<(), DaemonError>>),
    Connect(ConnectRequest, oneshot::Sender<Result<(), DaemonError>>),
    Disconnect(oneshot::Sender<Result<(), DaemonError>>),
    Serve(ServeRequest, oneshot::Sender<Result<(), DaemonError>>),
    Version(oneshot::Sender<String>),
    Session(SessionEvent, oneshot::Sender<SessionEventReply>),
    /// Fired periodically while Connected by the ticker spawned in
    /// `start_session`, per §9 Open Question "default-interface change
    /// mid-session".
    CheckDefaultRoute(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<Command>,
}

impl ActorHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (tx, rx) = oneshot::channel();
        // The mailbox is only closed once the actor task itself has
        // exited, which only happens at process shutdown.
        let _ = self.tx.send(make(tx)).await;
        rx.await.expect("actor task dropped the reply channel")
    }

    pub async fn ping(&self) {
        self.call(Command::Ping).await
    }

    pub async fn status(&self) -> StatusResponse {
        self.call(Command::Status).await
    }

    pub async fn get_state(&self) -> DaemonLocalState {
        self.call(Command::GetState).await
    }

    pub async fn set_state(&self, state: DaemonLocalState) -> Result<(), DaemonError> {
        self.call(|tx| Command::SetState(state, tx)).await
    }

    pub async fn connect(&self, req: ConnectRequest) -> Result<(), DaemonError> {
        self.call(|tx| Command::Connect(req, tx)).await
    }

    pub async fn disconnect(&self) -> Result<(), DaemonError> {
        self.call(Command::Disconnect).await
    }

    pub async fn serve(&self, req: ServeRequest) -> Result<(), DaemonError> {
        self.call(|tx| Command::Serve(req, tx)).await
    }

    pub async fn version(&self) -> String {
        self.call(Command::Version).await
    }

    pub async fn session_event(&self, event: SessionEvent) -> SessionEventReply {
        self.call(|tx| Command::Session(event, tx)).await
    }

    pub async fn check_default_route(&self) {
        self.call(Command::CheckDefaultRoute).await
    }
}

pub struct DaemonActor {
    status: DaemonStatus,
    profile: Option<String>,
    local_state: DaemonLocalState,
    lifecycle: Option<PlatformLifecycleManager>,
    session_shutdown: Option<oneshot::Sender<()>>,
    /// The control plane's own address, resolved from the session's WS
    /// URL at connect time; needed so its own traffic can be exempted
    /// from the tunnel alongside the target server's.
    control_plane_ip: Option<Ipv4Addr>,
    route_monitor: rvpn_wireguard::DefaultRouteMonitor,
    route_monitor_shutdown: Option<oneshot::Sender<()>>,
}

/// Spawns the actor task and returns a cloneable handle to it.
pub fn spawn() -> ActorHandle {
    let (tx, rx) = mpsc::channel(64);
    let handle = ActorHandle { tx };
    let local_state = local_state::load_or_default().unwrap_or_default();
    let actor = DaemonActor {
        status: DaemonStatus::Disconnected,
        profile: None,
        local_state,
        lifecycle: None,
        session_shutdown: None,
        control_plane_ip: None,
        route_monitor: rvpn_wireguard::DefaultRouteMonitor::new(),
        route_monitor_shutdown: None,
    };
    tokio::spawn(actor.run(rx, handle.clone()));
    handle
}

impl DaemonActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, self_handle: ActorHandle) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd, &self_handle).await;
        }
    }

    async fn handle(&mut self, cmd: Command, self_handle: &ActorHandle) {
        match cmd {
            Command::Ping(reply) => {
                let _ = reply.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(StatusResponse {
                    status: self.status,
                    profile: self.profile.clone(),
                });
            }
            Command::GetState(reply) => {
                let _ = reply.send(self.local_state.clone());
            }
            Command::SetState(state, reply) => {
                self.local_state = state;
                let _ = reply.send(local_state::save(&self.local_state));
            }
            Command::Version(reply) => {
                let _ = reply.send(VERSION.to_string());
            }
            Command::Connect(req, reply) => {
                let result = self.start_session(req.profile, req.device_token, req.control_plane_ws_url, false, self_handle).await;
                let _ = reply.send(result);
            }
            Command::Serve(req, reply) => {
                if !rvpn_wireguard::SERVE_SUPPORTED {
                    let _ = reply.send(Err(DaemonError::ServeUnsupported));
                    return;
                }
                let result = self.start_session(req.profile, req.device_token, req.control_plane_ws_url, true, self_handle).await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                let result = self.disconnect().await;
                let _ = reply.send(result);
            }
            Command::Session(event, reply) => {
                let result = self.handle_session_event(event).await;
                let _ = reply.send(result);
            }
            Command::CheckDefaultRoute(reply) => {
                self.check_default_route().await;
                let _ = reply.send(());
            }
        }
    }

    /// §9 Open Question "default-interface change mid-session": polls
    /// whether the host's default interface changed and, if so, re-pins
    /// the exemption routes onto it.
    async fn check_default_route(&mut self) {
        if self.status != DaemonStatus::Connected {
            return;
        }
        let Some(manager) = self.lifecycle.as_ref() else {
            return;
        };
        if self.route_monitor.poll_change(manager).await.is_none() {
            return;
        }
        let Some(manager) = self.lifecycle.as_mut() else {
            return;
        };
        if let Err(e) = manager.repin_exemption_routes().await {
            warn!(error = %e, "failed to re-pin exemption routes after default-interface change");
        }
    }

    async fn start_session(
        &mut self,
        profile: String,
        device_token: String,
        ws_url: String,
        serve_mode: bool,
        self_handle: &ActorHandle,
    ) -> Result<(), DaemonError> {
        if self.status != DaemonStatus::Disconnected {
            return Err(DaemonError::WrongStatus {
                action: if serve_mode { "serve" } else { "connect" },
                status: self.status,
            });
        }

        if self.lifecycle.is_none() {
            let mut manager = PlatformLifecycleManager::new()
                .await
                .map_err(DaemonError::WireGuard)?;
            manager.start_device().await.map_err(DaemonError::WireGuard)?;
            self.lifecycle = Some(manager);
        }

        self.control_plane_ip = resolve_control_plane_ip(&ws_url).await;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (opened_tx, opened_rx) = oneshot::channel();
        self.session_shutdown = Some(shutdown_tx);
        self.profile = Some(profile.clone());

        tokio::spawn(session::run(
            ws_url,
            device_token,
            serve_mode,
            self_handle.clone(),
            shutdown_rx,
            opened_tx,
        ));

        let (rm_shutdown_tx, mut rm_shutdown_rx) = oneshot::channel();
        self.route_monitor_shutdown = Some(rm_shutdown_tx);
        self.route_monitor = rvpn_wireguard::DefaultRouteMonitor::new();
        let monitor_handle = self_handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEFAULT_ROUTE_POLL_INTERVAL);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                tokio::select! {
                    _ = &mut rm_shutdown_rx => return,
                    _ = ticker.tick() => monitor_handle.check_default_route().await,
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| DaemonError::Session("session task exited before opening".into()))?
            .map_err(DaemonError::Session)?;

        // The RPC contract is "returns success once the WS is open and
        // handshake started" (`spec.md` §4.1); the actual status
        // transition to Connected/Serving happens once `connect_server` /
        // `serve_vpn` is applied via a `SessionEvent`.
        info!(profile, serve_mode, "control-plane session opened");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DaemonError> {
        if self.status == DaemonStatus::Disconnected {
            return Err(DaemonError::WrongStatus {
                action: "disconnect",
                status: self.status,
            });
        }

        if let Some(shutdown) = self.session_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(shutdown) = self.route_monitor_shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(manager) = self.lifecycle.as_mut() {
            manager.disconnect().await.map_err(DaemonError::WireGuard)?;
            manager
                .shutdown_device()
                .await
                .map_err(DaemonError::WireGuard)?;
        }
        self.lifecycle = None;
        self.status = DaemonStatus::Disconnected;
        self.profile = None;
        Ok(())
    }

    async fn handle_session_event(&mut self, event: SessionEvent) -> SessionEventReply {
        match event {
            SessionEvent::GetDeviceAuth => {
                let token = self.local_state.control_plane_auth.clone();
                match token {
                    Some(device_token) => SessionEventReply::DeviceAuth {
                        success: true,
                        device_token,
                    },
                    None => SessionEventReply::DeviceAuth {
                        success: false,
                        device_token: String::new(),
                    },
                }
            }
            SessionEvent::GetClientInformation => {
                if local_state::ensure_keypair(&mut self.local_state).is_err() {
                    return SessionEventReply::ClientInformation {
                        success: false,
                        public_key: String::new(),
                    };
                }
                SessionEventReply::ClientInformation {
                    success: true,
                    public_key: self.local_state.public_key.clone().unwrap_or_default(),
                }
            }
            SessionEvent::GetServeInformation { .. } => {
                if local_state::ensure_keypair(&mut self.local_state).is_err() {
                    return SessionEventReply::ServeInformation {
                        success: false,
                        public_key: String::new(),
                    };
                }
                SessionEventReply::ServeInformation {
                    success: true,
                    public_key: self.local_state.public_key.clone().unwrap_or_default(),
                }
            }
            SessionEvent::ConnectServer(params) => {
                // Pubkey-refusal invariant (`spec.md` §8): a mismatch is
                // always a refusal, WG state is left untouched.
                if Some(&params.client_public_key) != self.local_state.public_key.as_ref() {
                    warn!("connect_server pubkey mismatch, refusing");
                    return SessionEventReply::Applied { success: false };
                }

                let Some(manager) = self.lifecycle.as_mut() else {
                    return SessionEventReply::Applied { success: false };
                };

                let control_plane_ip = self.control_plane_ip.unwrap_or(params.server_public_ip);
                let cfg = rvpn_wireguard::ClientConf {
                    private_key: self.local_state.private_key.clone().unwrap_or_default(),
                    client_internal_ip: params.client_internal_ip,
                    client_internal_cidr: params.client_internal_cidr,
                    server_public_key: params.server_public_key,
                    server_public_ip: params.server_public_ip,
                    server_public_vpn_port: params.server_public_vpn_port,
                    dns_ip: params.dns_ip,
                    control_plane_ip,
                };
                match manager.update_client_conf(cfg).await {
                    Ok(()) => {
                        self.status = DaemonStatus::Connected;
                        spawn_health_probe(params.server_internal_ip);
                        SessionEventReply::Applied { success: true }
                    }
                    Err(e) => {
                        warn!(error = %e, "update_client_conf failed");
                        SessionEventReply::Applied { success: false }
                    }
                }
            }
            SessionEvent::ServeVpn(params) => {
                if Some(&params.server_public_key) != self.local_state.public_key.as_ref() {
                    warn!("serve_vpn pubkey mismatch, refusing");
                    return SessionEventReply::Applied { success: false };
                }
                let Some(manager) = self.lifecycle.as_mut() else {
                    return SessionEventReply::Applied { success: false };
                };
                let cfg = rvpn_wireguard::ServeConf {
                    private_key: self.local_state.private_key.clone().unwrap_or_default(),
                    internal_ip: params.server_internal_ip,
                    internal_cidr: params.server_internal_cidr,
                    peers: params
                        .peers
                        .into_iter()
                        .map(|p| rvpn_wireguard::WgPeer {
                            public_key: p.public_key,
                            allowed_ip: p.allowed_ip,
                            allowed_cidr: p.allowed_cidr,
                        })
                        .collect(),
                };
                match manager.update_serve_conf(cfg).await {
                    Ok(()) => {
                        self.status = DaemonStatus::Serving;
                        SessionEventReply::Applied { success: true }
                    }
                    Err(e) => {
                        warn!(error = %e, "update_serve_conf failed");
                        SessionEventReply::Applied { success: false }
                    }
                }
            }
            SessionEvent::AppendPeers(peers) => {
                if let Some(manager) = self.lifecycle.as_mut() {
                    let peers = peers
                        .into_iter()
                        .map(|p| rvpn_wireguard::WgPeer {
                            public_key: p.public_key,
                            allowed_ip: p.allowed_ip,
                            allowed_cidr: p.allowed_cidr,
                        })
                        .collect();
                    let ok = manager.append_peers(peers).await.is_ok();
                    SessionEventReply::Applied { success: ok }
                } else {
                    SessionEventReply::Applied { success: false }
                }
            }
            SessionEvent::DeletePeers(params) => {
                if let Some(manager) = self.lifecycle.as_mut() {
                    let peers = params
                        .peers
                        .into_iter()
                        .map(|p| rvpn_wireguard::WgPeer {
                            public_key: p.public_key,
                            allowed_ip: p.allowed_ip,
                            allowed_cidr: p.allowed_cidr,
                        })
                        .collect();
                    let ok = manager.delete_peers(peers).await.is_ok();
                    SessionEventReply::Applied { success: ok }
                } else {
                    SessionEventReply::Applied { success: false }
                }
            }
            SessionEvent::SessionLost => {
                info!("control-plane session lost, reverting to disconnected");
                if let Some(manager) = self.lifecycle.as_mut() {
                    let _ = manager.disconnect().await;
                    let _ = manager.shutdown_device().await;
                }
                self.lifecycle = None;
                self.status = DaemonStatus::Disconnected;
                self.profile = None;
                self.session_shutdown = None;
                if let Some(shutdown) = self.route_monitor_shutdown.take() {
                    let _ = shutdown.send(());
                }
                SessionEventReply::Ack
            }
        }
    }
}

/// §9 Open Question "health probe after Connect": fires a single best-
/// effort UDP probe in the background so it never delays the
/// `Connected` transition (`SPEC_FULL.md` §2.3 supplement).
fn spawn_health_probe(server_internal_ip: Ipv4Addr) {
    tokio::spawn(async move {
        if send_health_probe(server_internal_ip).await {
            info!(%server_internal_ip, "post-connect health probe succeeded");
        } else {
            warn!(%server_internal_ip, "post-connect health probe got no response within 2s");
        }
    });
}

/// Sends one UDP datagram to the server's tunnel-internal address and
/// waits up to 2s for any response, including the ICMP port-unreachable
/// that surfaces as a `recv` error on a connected UDP socket — that still
/// proves L3 reachability, so any completion within the deadline counts
/// as success; only a timeout does not.
async fn send_health_probe(server_internal_ip: Ipv4Addr) -> bool {
    let Ok(socket) = tokio::net::UdpSocket::bind("0.0.0.0:0").await else {
        return false;
    };
    if socket
        .connect((server_internal_ip, rvpn_wireguard::HEALTH_PROBE_PORT))
        .await
        .is_err()
    {
        return false;
    }
    if socket.send(b"rvpn-health-probe").await.is_err() {
        return false;
    }
    let mut buf = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .is_ok()
}

/// Resolves the control plane's own address from its WS URL so it can be
/// exempted from the tunnel alongside the target server's public IP. Best
/// effort: a malformed URL or resolution failure just leaves the exemption
/// unset, which `ConnectServer` then falls back from.
async fn resolve_control_plane_ip(ws_url: &str) -> Option<Ipv4Addr> {
    let url = url::Url::parse(ws_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default().unwrap_or(443);

    tokio::net::lookup_host((host, port))
        .await
        .ok()?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
}
