use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use encore_types::UserId;
use encore_types::events::GatewayEvent;

/// Transport side of a live connection. One per socket, created at open time.
///
/// `conn_id` is the key the transport knows at disconnect; the registry
/// stores it next to the declared identity so either key can find the entry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its socket task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Queue an event for this connection. Fails only if the socket task is gone.
    pub fn send(&self, event: GatewayEvent) -> Result<(), GatewayEvent> {
        self.tx.send(event).map_err(|e| e.0)
    }
}

/// A registered `(identity, handle)` pair.
#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: UserId,
    pub handle: ConnectionHandle,
}

#[derive(Default)]
struct Entries {
    by_identity: HashMap<UserId, ConnectionHandle>,
    by_conn: HashMap<Uuid, Vec<UserId>>,
}

/// Who is currently online. Both indices live under one lock, so every
/// operation sees them consistent.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Entries>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration wins. Returns `false` if `identity` was already
    /// held by some connection and this attempt was dropped.
    pub async fn register(&self, identity: UserId, handle: ConnectionHandle) -> bool {
        let mut entries = self.inner.write().await;

        if entries.by_identity.contains_key(&identity) {
            debug!("{} already registered, dropping connection {}", identity, handle.conn_id);
            return false;
        }

        entries.by_conn.entry(handle.conn_id).or_default().push(identity);
        info!("{} registered on connection {}", identity, handle.conn_id);
        entries.by_identity.insert(identity, handle);
        true
    }

    /// Remove every identity whose stored handle is `conn_id`.
    /// Returns the identities that went offline.
    pub async fn unregister(&self, conn_id: Uuid) -> Vec<UserId> {
        let mut entries = self.inner.write().await;

        let identities = entries.by_conn.remove(&conn_id).unwrap_or_default();
        for identity in &identities {
            let owned = entries
                .by_identity
                .get(identity)
                .is_some_and(|h| h.conn_id == conn_id);
            if owned {
                entries.by_identity.remove(identity);
            }
        }

        if !identities.is_empty() {
            info!("connection {} unregistered ({} identities)", conn_id, identities.len());
        }
        identities
    }

    pub async fn find(&self, identity: UserId) -> Option<Connection> {
        self.inner
            .read()
            .await
            .by_identity
            .get(&identity)
            .map(|handle| Connection {
                identity,
                handle: handle.clone(),
            })
    }

    /// Point-in-time copy of every registered pair.
    pub async fn snapshot(&self) -> Vec<Connection> {
        self.inner
            .read()
            .await
            .by_identity
            .iter()
            .map(|(identity, handle)| Connection {
                identity: *identity,
                handle: handle.clone(),
            })
            .collect()
    }

    /// Number of registered identities.
    pub async fn online_count(&self) -> usize {
        self.inner.read().await.by_identity.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_registration_wins() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        assert!(registry.register(user, first.clone()).await);
        assert!(!registry.register(user, second).await);

        let found = registry.find(user).await.unwrap();
        assert_eq!(found.handle.conn_id, first.conn_id);
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_removes_by_transport_handle() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::new();

        registry.register(user, handle.clone()).await;
        assert_eq!(registry.unregister(handle.conn_id).await, vec![user]);
        assert!(registry.find(user).await.is_none());
        assert_eq!(registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_duplicate_does_not_evict_winner() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        registry.register(user, first.clone()).await;
        registry.register(user, second.clone()).await;

        assert!(registry.unregister(second.conn_id).await.is_empty());
        assert_eq!(registry.find(user).await.unwrap().handle.conn_id, first.conn_id);
    }

    #[tokio::test]
    async fn identity_is_free_again_after_disconnect() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        registry.register(user, first.clone()).await;
        registry.unregister(first.conn_id).await;
        assert!(registry.register(user, second.clone()).await);
        assert_eq!(registry.find(user).await.unwrap().handle.conn_id, second.conn_id);
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_exactly_one() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..16 {
            let (handle, rx) = ConnectionHandle::new();
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.register(user, handle).await }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(registry.online_count().await, 1);
    }
}
