//! Process-wide registry of live stream connections.
//!
//! Every accepted connection is registered with its cancellation token so
//! shutdown (and targeted kicks) can close it cooperatively. A connection
//! may additionally be bound to a user-visible identity via
//! [`Context::online`](crate::handler::Context::online); the binding is
//! dropped when the connection closes whether or not `offline` was called.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct ConnEntry {
    token: CancellationToken,
    identity: Option<String>,
}

/// Concurrent mapping of connection ids and identities to live connections.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    conns: DashMap<u64, ConnEntry>,
    identities: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning its id.
    pub(crate) fn register(&self, token: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.conns.insert(
            id,
            ConnEntry {
                token,
                identity: None,
            },
        );
        id
    }

    /// Deregister a closed connection and drop its identity binding.
    pub(crate) fn remove(&self, conn_id: u64) {
        if let Some((_, entry)) = self.conns.remove(&conn_id) {
            if let Some(identity) = entry.identity {
                self.identities.remove_if(&identity, |_, id| *id == conn_id);
            }
        }
    }

    /// Bind an identity to a connection, replacing any previous binding of
    /// either the connection or the identity.
    pub(crate) fn bind_identity(&self, conn_id: u64, identity: &str) {
        let Some(mut entry) = self.conns.get_mut(&conn_id) else {
            return;
        };
        if let Some(old) = entry.identity.take() {
            self.identities.remove_if(&old, |_, id| *id == conn_id);
        }
        entry.identity = Some(identity.to_string());
        drop(entry);
        self.identities.insert(identity.to_string(), conn_id);
    }

    /// Drop a connection's identity binding, if any.
    pub(crate) fn unbind_identity(&self, conn_id: u64) {
        let Some(mut entry) = self.conns.get_mut(&conn_id) else {
            return;
        };
        if let Some(identity) = entry.identity.take() {
            drop(entry);
            self.identities.remove_if(&identity, |_, id| *id == conn_id);
        }
    }

    /// Close the connection bound to an identity. Returns whether a live
    /// connection was found.
    pub(crate) fn kick(&self, identity: &str) -> bool {
        let Some(conn_id) = self.identities.get(identity).map(|id| *id) else {
            return false;
        };
        match self.conns.get(&conn_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of live connections.
    pub(crate) fn len(&self) -> usize {
        self.conns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(CancellationToken::new());
        let b = registry.register(CancellationToken::new());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.remove(a);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identity_binding_is_dropped_on_remove() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(CancellationToken::new());
        registry.bind_identity(id, "alice");
        assert!(registry.kick("alice"));

        registry.remove(id);
        assert!(!registry.kick("alice"));
    }

    #[test]
    fn test_rebinding_replaces_old_identity() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(CancellationToken::new());
        registry.bind_identity(id, "alice");
        registry.bind_identity(id, "bob");

        assert!(!registry.kick("alice"));
        assert!(registry.kick("bob"));
    }

    #[test]
    fn test_unbind_identity() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(CancellationToken::new());
        registry.bind_identity(id, "alice");
        registry.unbind_identity(id);
        assert!(!registry.kick("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_kick_cancels_token() {
        let registry = ConnectionRegistry::new();
        let token = CancellationToken::new();
        let id = registry.register(token.clone());
        registry.bind_identity(id, "alice");

        assert!(!token.is_cancelled());
        assert!(registry.kick("alice"));
        assert!(token.is_cancelled());
    }
}
