//! Session bindings: which scene connection answers for which session id.
//!
//! Identity is advisory and self-declared at handshake; the registry does not
//! authenticate it. At most one live connection is bound per session id, and
//! a new handshake for the same id atomically supersedes the prior binding.
//! The superseded connection is not closed; it just stops receiving routed
//! requests (its own in-flight requests still resolve through its
//! correlator).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::connection::PeerConnection;
use crate::correlator::Correlator;

/// The live endpoint requests for a session are forwarded to.
#[derive(Clone)]
pub struct SceneHandle {
    /// The scene's connection.
    pub conn: Arc<PeerConnection>,
    /// Correlator tracking requests routed over this connection.
    pub correlator: Arc<Correlator>,
}

impl SceneHandle {
    /// Bundle a connection with its correlator.
    pub fn new(conn: Arc<PeerConnection>, correlator: Arc<Correlator>) -> Self {
        Self { conn, correlator }
    }
}

/// Table of session id → authoritative scene connection.
pub struct SessionRegistry {
    bindings: DashMap<String, SceneHandle>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Install or replace the scene connection for a session.
    ///
    /// Replacing does not disturb requests already routed to the old
    /// connection; those resolve (or time out) through its own correlator.
    pub fn bind(&self, session_id: &str, handle: SceneHandle) {
        let conn_id = handle.conn.id;
        let previous = self.bindings.insert(session_id.to_owned(), handle);
        match previous {
            Some(old) if old.conn.id != conn_id => {
                info!(
                    session_id,
                    old_conn = old.conn.id,
                    new_conn = conn_id,
                    "scene binding superseded"
                );
            }
            Some(_) => {
                debug!(session_id, conn_id, "scene re-bound same connection");
            }
            None => {
                info!(session_id, conn_id, "scene bound");
            }
        }
    }

    /// The currently bound handle for a session, if any.
    pub fn lookup(&self, session_id: &str) -> Option<SceneHandle> {
        self.bindings.get(session_id).map(|e| e.value().clone())
    }

    /// Remove every binding that still points at this connection identity.
    ///
    /// A connection that was already superseded no longer appears in the
    /// table, making this a no-op for it. Returns the session ids that were
    /// unbound.
    pub fn unbind(&self, conn_id: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .bindings
            .iter()
            .filter(|entry| entry.value().conn.id == conn_id)
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in &stale {
            let removed = self
                .bindings
                .remove_if(session_id, |_, handle| handle.conn.id == conn_id);
            if removed.is_some() {
                info!(session_id, conn_id, "scene unbound");
            }
        }
        stale
    }

    /// Number of sessions with a live binding.
    pub fn active_sessions(&self) -> usize {
        self.bindings.len()
    }

    /// Sorted session ids with a live binding.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bindings.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OUTBOUND_BUFFER;
    use tokio::sync::mpsc;

    fn make_handle(conn_id: u64) -> (SceneHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn = PeerConnection::new(conn_id, tx);
        (SceneHandle::new(conn, Correlator::new()), rx)
    }

    #[test]
    fn lookup_empty_registry() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup("default").is_none());
        assert_eq!(registry.active_sessions(), 0);
    }

    #[test]
    fn bind_then_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = make_handle(1);
        registry.bind("s1", handle);

        let found = registry.lookup("s1").unwrap();
        assert_eq!(found.conn.id, 1);
        assert_eq!(registry.active_sessions(), 1);
    }

    #[test]
    fn lookup_other_session_misses() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = make_handle(1);
        registry.bind("s1", handle);
        assert!(registry.lookup("s2").is_none());
    }

    #[test]
    fn rebind_supersedes() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = make_handle(1);
        let (new, _rx2) = make_handle(2);
        registry.bind("s1", old);
        registry.bind("s1", new);

        // The next lookup routes to the new connection, not the old one.
        assert_eq!(registry.lookup("s1").unwrap().conn.id, 2);
        assert_eq!(registry.active_sessions(), 1);
    }

    #[test]
    fn bind_same_connection_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = make_handle(1);
        registry.bind("s1", handle.clone());
        registry.bind("s1", handle);
        assert_eq!(registry.lookup("s1").unwrap().conn.id, 1);
        assert_eq!(registry.active_sessions(), 1);
    }

    #[test]
    fn unbind_removes_binding() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = make_handle(1);
        registry.bind("s1", handle);

        let removed = registry.unbind(1);
        assert_eq!(removed, vec!["s1".to_owned()]);
        assert!(registry.lookup("s1").is_none());
    }

    #[test]
    fn unbind_superseded_connection_is_noop() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = make_handle(1);
        let (new, _rx2) = make_handle(2);
        registry.bind("s1", old);
        registry.bind("s1", new);

        // The old connection closing must not disturb the new binding.
        let removed = registry.unbind(1);
        assert!(removed.is_empty());
        assert_eq!(registry.lookup("s1").unwrap().conn.id, 2);
    }

    #[test]
    fn unbind_unknown_connection_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.unbind(99).is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let (h1, _rx1) = make_handle(1);
        let (h2, _rx2) = make_handle(2);
        registry.bind("s1", h1);
        registry.bind("s2", h2);

        let _ = registry.unbind(1);
        assert!(registry.lookup("s1").is_none());
        assert_eq!(registry.lookup("s2").unwrap().conn.id, 2);
    }

    #[test]
    fn sessions_sorted() {
        let registry = SessionRegistry::new();
        let (h1, _rx1) = make_handle(1);
        let (h2, _rx2) = make_handle(2);
        registry.bind("zeta", h1);
        registry.bind("alpha", h2);
        assert_eq!(registry.sessions(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn one_connection_serving_multiple_sessions_unbinds_all() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn = PeerConnection::new(5, tx);
        registry.bind("a", SceneHandle::new(conn.clone(), Correlator::new()));
        registry.bind("b", SceneHandle::new(conn, Correlator::new()));

        let mut removed = registry.unbind(5);
        removed.sort();
        assert_eq!(removed, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(registry.active_sessions(), 0);
    }
}
