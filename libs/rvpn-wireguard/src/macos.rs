//! macOS WireGuard Lifecycle Manager.
//!
//! Grounded on
//! `examples/firezone-firezone/rust/libs/bin-shared/src/tun_device_manager/macos.rs`:
//! no netlink on this platform, so interface/route configuration shells out
//! to `ifconfig`/`route`, the BSD equivalent of the Linux rtnetlink calls.
//! `Serve`/`UpdateServeConf` are Linux-only per `spec.md` §4.3, so this
//! manager only implements the client-side lifecycle.

use std::net::Ipv4Addr;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{
    ClientConf, ServeConf, WgPeer, WireGuardError, CLIENT_LISTEN_PORT, PERSISTENT_KEEPALIVE_SECS,
    TUN_NAME,
};

#[derive(Debug, Clone)]
enum Installed {
    ExemptionRoute { dest: Ipv4Addr },
    TunnelRoute { dest: Ipv4Addr, cidr: u8 },
}

pub struct LifecycleManager {
    started: bool,
    installed: Vec<Installed>,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self, WireGuardError> {
        Ok(Self {
            started: false,
            installed: Vec::new(),
        })
    }

    pub async fn start_device(&mut self) -> Result<(), WireGuardError> {
        if self.started {
            return Ok(());
        }
        // `utun140` is created implicitly by opening `/dev/utunN`; the
        // userspace WireGuard engine (external collaborator, see
        // `spec.md` §1) owns that fd. This manager only brings the
        // resulting interface up and assigns routes once it exists.
        run("ifconfig", &[TUN_NAME, "up"]).await?;
        self.started = true;
        info!(interface = TUN_NAME, "wireguard device started");
        Ok(())
    }

    pub async fn update_client_conf(&mut self, cfg: ClientConf) -> Result<(), WireGuardError> {
        self.start_device().await?;

        let (default_iface, default_gateway) = default_route_info().await?;

        for dest in [cfg.server_public_ip, cfg.control_plane_ip] {
            run(
                "route",
                &["-n", "add", "-host", &dest.to_string(), &default_gateway.to_string()],
            )
            .await?;
            self.installed.push(Installed::ExemptionRoute { dest });
        }

        run(
            "ifconfig",
            &[
                TUN_NAME,
                "inet",
                &cfg.client_internal_ip.to_string(),
                &cfg.client_internal_ip.to_string(),
                "netmask",
                &cidr_to_netmask(cfg.client_internal_cidr),
            ],
        )
        .await?;

        configure_wg_device(
            &cfg.private_key,
            CLIENT_LISTEN_PORT,
            &[WgPeer {
                public_key: cfg.server_public_key.clone(),
                allowed_ip: Ipv4Addr::new(0, 0, 0, 0),
                allowed_cidr: 0,
            }],
            Some((cfg.server_public_ip, cfg.server_public_vpn_port)),
            Some(PERSISTENT_KEEPALIVE_SECS),
        )
        .await?;

        // macOS has no "beat the default without removing it" shorthand,
        // so both halves of the address space are routed over the tunnel.
        for (dest, cidr) in [(Ipv4Addr::new(0, 0, 0, 0), 1u8), (Ipv4Addr::new(128, 0, 0, 0), 1u8)]
        {
            run(
                "route",
                &["-n", "add", "-net", &format!("{dest}/{cidr}"), "-interface", TUN_NAME],
            )
            .await?;
            self.installed.push(Installed::TunnelRoute { dest, cidr });
        }

        let _ = default_iface;
        info!(server = %cfg.server_public_ip, "client tunnel configured");
        Ok(())
    }

    pub async fn update_serve_conf(&mut self, _cfg: ServeConf) -> Result<(), WireGuardError> {
        Err(WireGuardError::ServeUnsupported)
    }

    pub async fn append_peers(&mut self, peers: Vec<WgPeer>) -> Result<(), WireGuardError> {
        for peer in &peers {
            add_wg_peer(peer, None, None).await?;
        }
        Ok(())
    }

    pub async fn delete_peers(&mut self, peers: Vec<WgPeer>) -> Result<(), WireGuardError> {
        for peer in &peers {
            remove_wg_peer(peer).await?;
        }
        Ok(())
    }

    /// §9 Open Question "default-interface change mid-session": re-pins
    /// every tracked exemption route onto the new default gateway.
    pub async fn repin_exemption_routes(&mut self) -> Result<(), WireGuardError> {
        let (_, new_gateway) = default_route_info().await?;
        for item in &self.installed {
            let Installed::ExemptionRoute { dest } = item else {
                continue;
            };
            let _ = run("route", &["-n", "delete", "-host", &dest.to_string()]).await;
            run(
                "route",
                &["-n", "add", "-host", &dest.to_string(), &new_gateway.to_string()],
            )
            .await?;
        }
        info!(gateway = %new_gateway, "re-pinned exemption routes after default-interface change");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), WireGuardError> {
        let mut remaining = Vec::new();
        for item in self.installed.drain(..) {
            match item {
                Installed::TunnelRoute { dest, cidr } => {
                    let _ = run(
                        "route",
                        &["-n", "delete", "-net", &format!("{dest}/{cidr}")],
                    )
                    .await;
                }
                keep @ Installed::ExemptionRoute { .. } => remaining.push(keep),
            }
        }
        self.installed = remaining;
        info!("tunnel disconnected, exemption routes retained pending shutdown");
        Ok(())
    }

    pub async fn shutdown_device(&mut self) -> Result<(), WireGuardError> {
        for item in self.installed.drain(..) {
            if let Installed::ExemptionRoute { dest } = item {
                if let Err(e) = run("route", &["-n", "delete", "-host", &dest.to_string()]).await {
                    warn!(error = %e, %dest, "failed to remove exemption route");
                }
            }
        }
        self.started = false;
        info!("wireguard device shut down");
        Ok(())
    }
}

async fn default_route_info() -> Result<(String, Ipv4Addr), WireGuardError> {
    let output = Command::new("route")
        .args(["-n", "get", "default"])
        .output()
        .await
        .map_err(|e| WireGuardError::Io(e))?;
    let text = String::from_utf8_lossy(&output.stdout);
    let mut gateway = None;
    let mut iface = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("gateway: ") {
            gateway = rest.parse::<Ipv4Addr>().ok();
        }
        if let Some(rest) = line.strip_prefix("interface: ") {
            iface = Some(rest.to_string());
        }
    }
    match (iface, gateway) {
        (Some(iface), Some(gateway)) => Ok((iface, gateway)),
        _ => Err(WireGuardError::NoDefaultRoute),
    }
}

fn cidr_to_netmask(cidr: u8) -> String {
    let mask: u32 = if cidr == 0 { 0 } else { !0u32 << (32 - cidr) };
    Ipv4Addr::from(mask).to_string()
}

/// Hands key/peer/endpoint material to the external WireGuard control
/// interface (`spec.md` §1's external collaborator is the crypto engine
/// itself, not this glue). Shells out to `wg set`, the cross-platform
/// control CLI every userspace WireGuard engine exposes, the same idiom
/// `run`/`ifconfig`/`route` already use in this file.
async fn configure_wg_device(
    private_key: &str,
    listen_port: u16,
    peers: &[WgPeer],
    endpoint: Option<(Ipv4Addr, u16)>,
    persistent_keepalive: Option<u16>,
) -> Result<(), WireGuardError> {
    run_wg_set(&["listen-port", &listen_port.to_string()], Some(private_key)).await?;
    for peer in peers {
        add_wg_peer(peer, endpoint, persistent_keepalive).await?;
    }
    Ok(())
}

async fn add_wg_peer(
    peer: &WgPeer,
    endpoint: Option<(Ipv4Addr, u16)>,
    persistent_keepalive: Option<u16>,
) -> Result<(), WireGuardError> {
    let allowed_ips = format!("{}/{}", peer.allowed_ip, peer.allowed_cidr);
    let mut args = vec!["peer".to_string(), peer.public_key.clone()];
    args.push("allowed-ips".to_string());
    args.push(allowed_ips);
    if let Some((ip, port)) = endpoint {
        args.push("endpoint".to_string());
        args.push(format!("{ip}:{port}"));
    }
    if let Some(secs) = persistent_keepalive {
        args.push("persistent-keepalive".to_string());
        args.push(secs.to_string());
    }
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_wg_set(&arg_refs, None).await
}

async fn remove_wg_peer(peer: &WgPeer) -> Result<(), WireGuardError> {
    run_wg_set(&["peer", &peer.public_key, "remove"], None).await
}

/// Runs `wg set utunN <args...>`, piping a private key over stdin via
/// `/dev/stdin` so it never shows up as a CLI argument.
async fn run_wg_set(args: &[&str], private_key: Option<&str>) -> Result<(), WireGuardError> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;

    let mut command = Command::new("wg");
    command.arg("set").arg(TUN_NAME);
    if private_key.is_some() {
        command.arg("private-key").arg("/dev/stdin");
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }
    command.args(args);

    let mut child = command.spawn().map_err(WireGuardError::Io)?;
    if let Some(key) = private_key {
        let mut stdin = child.stdin.take().expect("stdin is piped above");
        stdin.write_all(key.as_bytes()).await.map_err(WireGuardError::Io)?;
        stdin.write_all(b"\n").await.map_err(WireGuardError::Io)?;
        drop(stdin);
    }

    let status = child.wait().await.map_err(WireGuardError::Io)?;
    if !status.success() {
        return Err(WireGuardError::WgConfig(format!(
            "wg set {TUN_NAME} {args:?} exited with {status}"
        )));
    }
    Ok(())
}

async fn run(cmd: &str, args: &[&str]) -> Result<(), WireGuardError> {
    let status = Command::new(cmd)
        .args(args)
        .status()
        .await
        .map_err(WireGuardError::Io)?;
    if !status.success() {
        return Err(WireGuardError::Iptables(format!(
            "{cmd} {:?} exited with {status}",
            args
        )));
    }
    Ok(())
}

/// macOS default-route change monitor, grounded on
/// `bin-shared/src/network_changes/macos.rs`'s `SCDynamicStore` watch.
/// Polling-based here rather than registering a real `SCDynamicStore`
/// callback, since that requires a CoreFoundation run loop this daemon
/// does not otherwise need.
pub struct DefaultRouteMonitor {
    last_iface: Option<String>,
}

impl DefaultRouteMonitor {
    pub fn new() -> Self {
        Self { last_iface: None }
    }

    pub async fn poll_change(&mut self, _manager: &LifecycleManager) -> Option<String> {
        let (iface, _) = default_route_info().await.ok()?;
        if self.last_iface.replace(iface.clone()).as_deref() != Some(iface.as_str()) {
            Some(iface)
        } else {
            None
        }
    }
}

impl Default for DefaultRouteMonitor {
    fn default() -> Self {
        Self::new()
    }
}
