//! Connection Manager (`spec.md` §4.5). In-memory, per-process registry of
//! currently-open WS sessions keyed by target. Grounded on
//! `examples/original_source/cmd/control-plane/connman.go`'s
//! `ConnectionManager{vpnServerConnections, vpnClientConnections}`,
//! reimplemented with a `dashmap::DashMap` for per-target locking instead
//! of the source's single map — `spec.md` §5 explicitly allows a
//! finer-grained lock. `dashmap` is in both `firezone-firezone`'s and
//! `Twister915-wirewarden`'s dependency tables.

use dashmap::DashMap;
use rvpn_protocol::jsonrpc::{Request, Response};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// One pending call issued by the control plane into a daemon's open
/// session, handed to that session's task over its mailbox.
pub struct OutboundCall {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub device_id: Uuid,
    pub tx: mpsc::Sender<OutboundCall>,
}

impl SessionHandle {
    pub async fn call(&self, request: Request) -> Option<Response> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(OutboundCall { request, reply: tx }).await.ok()?;
        rx.await.ok()
    }
}

#[derive(Default)]
struct Entry {
    serving: Option<SessionHandle>,
    clients: Vec<SessionHandle>,
}

#[derive(Default)]
pub struct ConnectionManager {
    entries: DashMap<String, Entry>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new `serve` session always wins — last-writer-wins, no liveness
    /// gate on the previous entry. See `SPEC_FULL.md` §6 item 1 (Open
    /// Question resolution).
    pub fn set_serving_session(&self, target: &str, handle: SessionHandle) {
        let mut entry = self.entries.entry(target.to_string()).or_default();
        entry.serving = Some(handle);
    }

    pub fn add_client_session(&self, target: &str, handle: SessionHandle) {
        let mut entry = self.entries.entry(target.to_string()).or_default();
        entry.clients.push(handle);
    }

    pub fn serving_session(&self, target: &str) -> Option<SessionHandle> {
        self.entries.get(target).and_then(|e| e.serving.clone())
    }

    pub fn client_sessions(&self, target: &str) -> Vec<SessionHandle> {
        self.entries
            .get(target)
            .map(|e| e.clients.clone())
            .unwrap_or_default()
    }

    /// `spec.md` §3: "a target is alive iff ... there is a live serving
    /// session in the Connection Manager."
    pub fn is_alive(&self, target: &str) -> bool {
        self.entries
            .get(target)
            .map(|e| e.serving.is_some())
            .unwrap_or(false)
    }

    pub fn remove_serving_session(&self, target: &str, device_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(target) {
            if entry.serving.as_ref().map(|s| s.device_id) == Some(device_id) {
                entry.serving = None;
            }
        }
    }

    pub fn remove_client_session(&self, target: &str, device_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(target) {
            entry.clients.retain(|c| c.device_id != device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle {
            device_id: Uuid::new_v4(),
            tx,
        }
    }

    #[test]
    fn new_serve_session_overrides_previous_one() {
        let manager = ConnectionManager::new();
        let first = handle();
        let second = handle();

        manager.set_serving_session("home", first.clone());
        assert!(manager.is_alive("home"));

        manager.set_serving_session("home", second.clone());
        assert_eq!(manager.serving_session("home").unwrap().device_id, second.device_id);
    }

    #[test]
    fn removing_serving_session_only_clears_matching_device() {
        let manager = ConnectionManager::new();
        let first = handle();
        let second = handle();

        manager.set_serving_session("home", first.clone());
        // A stale removal naming a device that is no longer the serving
        // session must not clear the new one.
        manager.set_serving_session("home", second.clone());
        manager.remove_serving_session("home", first.device_id);
        assert!(manager.is_alive("home"));

        manager.remove_serving_session("home", second.device_id);
        assert!(!manager.is_alive("home"));
    }

    #[test]
    fn client_sessions_accumulate_and_can_be_removed() {
        let manager = ConnectionManager::new();
        let a = handle();
        let b = handle();

        manager.add_client_session("home", a.clone());
        manager.add_client_session("home", b.clone());
        assert_eq!(manager.client_sessions("home").len(), 2);

        manager.remove_client_session("home", a.device_id);
        let remaining = manager.client_sessions("home");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].device_id, b.device_id);
    }

    #[test]
    fn unknown_target_is_not_alive() {
        let manager = ConnectionManager::new();
        assert!(!manager.is_alive("nonexistent"));
    }
}
