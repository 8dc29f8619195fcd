use thiserror::Error;

/// Errors surfaced to local-RPC callers (`spec.md` §7 "Precondition
/// violation"/"OS/kernel failure" categories). Kept separate from
/// `rvpn_wireguard::WireGuardError` so the RPC layer can attach its own
/// context without the lifecycle manager knowing about JSON-RPC at all.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot {action} while status is {status:?}")]
    WrongStatus {
        action: &'static str,
        status: rvpn_protocol::envelope::DaemonStatus,
    },
    #[error("serve is not supported on this platform")]
    ServeUnsupported,
    #[error("wireguard lifecycle error: {0}")]
    WireGuard(#[from] rvpn_wireguard::WireGuardError),
    #[error("control-plane session error: {0}")]
    Session(String),
    #[error("local state persistence error: {0}")]
    LocalState(String),
}
