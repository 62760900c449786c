use std::collections::HashSet;

use tracing::debug;

use encore_types::UserId;
use encore_types::events::GatewayEvent;

use crate::registry::ConnectionRegistry;

/// Best-effort fan-out over whatever is in the registry right now.
///
/// Delivery is at-most-once: nothing is buffered for identities that are
/// not connected, nothing is retried, and a closed socket is only logged.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Send `event` to every registered identity in `recipients`, or to
    /// everyone when `recipients` is `None`. Returns how many were reached.
    pub async fn dispatch(&self, event: GatewayEvent, recipients: Option<&HashSet<UserId>>) -> usize {
        if recipients.is_some_and(|r| r.is_empty()) {
            return 0;
        }

        let mut sent = 0;
        for conn in self.registry.snapshot().await {
            if recipients.is_some_and(|r| !r.contains(&conn.identity)) {
                continue;
            }
            match conn.handle.send(event.clone()) {
                Ok(()) => sent += 1,
                Err(_) => debug!(
                    "dropping event for {}: connection {} is closed",
                    conn.identity, conn.handle.conn_id
                ),
            }
        }
        sent
    }

    /// Broadcast an event to all connected clients.
    pub async fn broadcast(&self, event: GatewayEvent) -> usize {
        self.dispatch(event, None).await
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: UserId, event: GatewayEvent) -> bool {
        let recipients = HashSet::from([user_id]);
        self.dispatch(event, Some(&recipients)).await == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    async fn online(dispatcher: &Dispatcher) -> (UserId, UnboundedReceiver<GatewayEvent>) {
        let user = Uuid::new_v4();
        let (handle, rx) = ConnectionHandle::new();
        dispatcher.registry().register(user, handle).await;
        (user, rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (_, mut rx1) = online(&dispatcher).await;
        let (_, mut rx2) = online(&dispatcher).await;
        let (_, mut rx3) = online(&dispatcher).await;

        let event = GatewayEvent::notification("hello");
        assert_eq!(dispatcher.dispatch(event.clone(), None).await, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_eq!(rx.try_recv().unwrap(), event);
        }
    }

    #[tokio::test]
    async fn empty_recipient_set_reaches_nobody() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (_, mut rx) = online(&dispatcher).await;

        let nobody = HashSet::new();
        assert_eq!(dispatcher.dispatch(GatewayEvent::notification("x"), Some(&nobody)).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recipient_filter_selects_subset() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (u1, mut rx1) = online(&dispatcher).await;
        let (_, mut rx2) = online(&dispatcher).await;
        let offline = Uuid::new_v4();

        let recipients = HashSet::from([u1, offline]);
        assert_eq!(dispatcher.dispatch(GatewayEvent::notification("x"), Some(&recipients)).await, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connection_is_skipped_silently() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (gone, rx) = online(&dispatcher).await;
        drop(rx);
        let (_, mut rx2) = online(&dispatcher).await;

        assert!(!dispatcher.send_to_user(gone, GatewayEvent::notification("x")).await);
        assert_eq!(dispatcher.broadcast(GatewayEvent::notification("y")).await, 1);
        assert!(rx2.try_recv().is_ok());
    }
}
