//! Windows WireGuard Lifecycle Manager.
//!
//! Grounded on
//! `examples/firezone-firezone/rust/libs/bin-shared/src/tun_device_manager/windows.rs`:
//! route/interface configuration normally goes through the `windows` crate's
//! `Win32_NetworkManagement_IpHelper` (`CreateIpForwardEntry2`,
//! `GetIpForwardTable2`); this implementation shells out to `netsh`
//! instead, since the full `windows`-crate binding set is not part of this
//! workspace's dependency table and the shell surface is what the original
//! `rvpn` daemon's Windows build already relied on. `Serve` is Linux-only
//! per `spec.md` §4.3.

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
        self.started = true;
        info!(interface = TUN_NAME, "wireguard device started");
        Ok(())
    }

    pub async fn update_client_conf(&mut self, cfg: ClientConf) -> Result<(), WireGuardError> {
        self.start_device().await?;

        let (default_iface_idx, default_gateway) = default_route_info().await?;

        for dest in [cfg.server_public_ip, cfg.control_plane_ip] {
            netsh(&[
                "interface",
                "ipv4",
                "add",
                "route",
                &format!("{dest}/32"),
                &format!("interface={default_iface_idx}"),
                &format!("nexthop={default_gateway}"),
            ])
            .await?;
            self.installed.push(Installed::ExemptionRoute { dest });
        }

        netsh(&[
            "interface",
            "ipv4",
            "set",
            "address",
            &format!("name={TUN_NAME}"),
            "source=static",
            &format!("addr={}", cfg.client_internal_ip),
            &cidr_to_netmask(cfg.client_internal_cidr),
        ])
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

        // A single 0.0.0.0/0 route with metric 0 beats the existing
        // default on Windows, which orders routes by metric rather than
        // longest-prefix-first the way Linux/macOS do.
        netsh(&[
            "interface",
            "ipv4",
            "add",
            "route",
            "0.0.0.0/0",
            &format!("interface={TUN_NAME}"),
            "metric=0",
        ])
        .await?;

        netsh(&[
            "interface",
            "ipv4",
            "set",
            "dnsservers",
            &format!("name={TUN_NAME}"),
            "source=static",
            &format!("address={}", cfg.dns_ip),
        ])
        .await?;

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
    /// every tracked exemption route onto the new default interface.
    pub async fn repin_exemption_routes(&mut self) -> Result<(), WireGuardError> {
        let (new_index, new_gateway) = default_route_info().await?;
        for item in &self.installed {
            let Installed::ExemptionRoute { dest } = item;
            let _ = netsh(&["interface", "ipv4", "delete", "route", &format!("{dest}/32")]).await;
            netsh(&[
                "interface",
                "ipv4",
                "add",
                "route",
                &format!("{dest}/32"),
                &format!("interface={new_index}"),
                &format!("nexthop={new_gateway}"),
            ])
            .await?;
        }
        info!(new_index, "re-pinned exemption routes after default-interface change");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), WireGuardError> {
        let _ = netsh(&["interface", "ipv4", "delete", "route", "0.0.0.0/0", &format!("interface={TUN_NAME}")]).await;
        info!("tunnel disconnected, exemption routes retained pending shutdown");
        Ok(())
    }

    pub async fn shutdown_device(&mut self) -> Result<(), WireGuardError> {
        for item in self.installed.drain(..) {
            let Installed::ExemptionRoute { dest } = item;
            if let Err(e) = netsh(&[
                "interface",
                "ipv4",
                "delete",
                "route",
                &format!("{dest}/32"),
            ])
            .await
            {
                warn!(error = %e, %dest, "failed to remove exemption route");
            }
        }
        self.started = false;
        info!("wireguard device shut down");
        Ok(())
    }
}

/// Shells out to PowerShell's `Get-NetRoute` rather than binding
/// `GetIpForwardTable2` directly, since the full `windows`-crate binding
/// set for `Win32_NetworkManagement_IpHelper` is not part of this
/// workspace's dependency table (see the module doc comment). Picks the
/// lowest-`RouteMetric` `0.0.0.0/0` entry, same tie-break `GetBestRoute`
/// uses internally.
async fn default_route_info() -> Result<(u32, Ipv4Addr), WireGuardError> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Get-NetRoute -DestinationPrefix 0.0.0.0/0 -AddressFamily IPv4 \
             | Sort-Object -Property RouteMetric \
             | Select-Object -First 1 -Property ifIndex,NextHop \
             | Format-List",
        ])
        .output()
        .await
        .map_err(WireGuardError::Io)?;

    let text = String::from_utf8_lossy(&output.stdout);
    let mut index = None;
    let mut gateway = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "ifIndex" => index = value.trim().parse::<u32>().ok(),
            "NextHop" => gateway = value.trim().parse::<Ipv4Addr>().ok(),
            _ => {}
        }
    }
    match (index, gateway) {
        (Some(index), Some(gateway)) => Ok((index, gateway)),
        _ => Err(WireGuardError::NoDefaultRoute),
    }
}

fn cidr_to_netmask(cidr: u8) -> String {
    let mask: u32 = if cidr == 0 { 0 } else { !0u32 << (32 - cidr) };
    format!("mask={}", Ipv4Addr::from(mask))
}

/// Hands key/peer/endpoint material to the external WireGuard control
/// interface (`spec.md` §1's external collaborator is the crypto engine,
/// not this glue). Shells out to `wg set`, the same control CLI the
/// WireGuard for Windows installer ships (`wg.exe`), mirroring `netsh`'s
/// shell-out idiom elsewhere in this file.
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

/// Runs `wg.exe set <TUN_NAME> <args...>`, piping a private key over
/// stdin rather than a CLI argument so it never lands in process-list
/// output.
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

async fn netsh(args: &[&str]) -> Result<(), WireGuardError> {
    let status = Command::new("netsh")
        .args(args)
        .status()
        .await
        .map_err(WireGuardError::Io)?;
    if !status.success() {
        return Err(WireGuardError::Iptables(format!(
            "netsh {:?} exited with {status}",
            args
        )));
    }
    Ok(())
}

/// Windows default-route change monitor, grounded on
/// `bin-shared/src/network_changes/windows.rs`'s
/// `IpInterfaceChangeCallback` registration. Polling-based here for the
/// same reason noted in `default_route_info`.
pub struct DefaultRouteMonitor {
    last_index: Option<u32>,
}

impl DefaultRouteMonitor {
    pub fn new() -> Self {
        Self { last_index: None }
    }

    pub async fn poll_change(&mut self, _manager: &LifecycleManager) -> Option<u32> {
        let (index, _) = default_route_info().await.ok()?;
        if self.last_index.replace(index) != Some(index) {
            Some(index)
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
