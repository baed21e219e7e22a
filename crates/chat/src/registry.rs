// Connection registry: user id -> live WebSocket connection.
//
// The only mutable state shared across connection tasks. A second connection
// from the same user silently supersedes the first; the superseded socket
// task keeps running but is no longer reachable through the registry.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use innosphere_common::{protocol::ws::OutboundEvent, types::UserId};

/// Outbound handle for one live connection. Events sent through `outbound`
/// are written to the socket in order by the connection's own task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self { connection_id: Uuid::new_v4(), outbound, connected_at: Utc::now() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`. Always succeeds. A replaced
    /// handle is dropped from the map but its connection is not closed here.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        self.connections.write().await.insert(user_id, handle);
    }

    /// Remove the entry for `user_id`, but only when it still belongs to
    /// `connection_id`. A superseded connection tearing down must not evict
    /// its successor's entry.
    pub async fn unregister(&self, user_id: UserId, connection_id: Uuid) {
        let mut guard = self.connections.write().await;
        if guard.get(&user_id).is_some_and(|handle| handle.connection_id == connection_id) {
            guard.remove(&user_id);
        }
    }

    /// Push `event` to `user_id`'s connection. Returns whether the push was
    /// accepted; `false` means the user is offline (no entry, or the
    /// connection task already dropped its receiver). Never an error: the
    /// durable write is the source of truth, this is the best-effort path.
    pub async fn send(&self, user_id: UserId, event: OutboundEvent) -> bool {
        let handle = {
            let guard = self.connections.read().await;
            guard.get(&user_id).cloned()
        };

        match handle {
            Some(handle) => handle.outbound.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_registered(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionHandle, ConnectionRegistry};
    use innosphere_common::protocol::ws::OutboundEvent;
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ConnectionHandle::new(sender), receiver)
    }

    #[tokio::test]
    async fn send_reaches_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = handle();
        registry.register(1, conn).await;

        assert!(registry.send(1, OutboundEvent::NotificationUpdate {}).await);
        assert_eq!(rx.recv().await, Some(OutboundEvent::NotificationUpdate {}));
    }

    #[tokio::test]
    async fn send_to_offline_user_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(42, OutboundEvent::NotificationUpdate {}).await);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_returns_false() {
        let registry = ConnectionRegistry::new();
        let (conn, rx) = handle();
        registry.register(1, conn).await;
        drop(rx);

        assert!(!registry.send(1, OutboundEvent::NotificationUpdate {}).await);
    }

    #[tokio::test]
    async fn second_connection_supersedes_first() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = handle();
        let (second, mut second_rx) = handle();
        registry.register(1, first).await;
        registry.register(1, second).await;

        assert_eq!(registry.active_connections().await, 1);
        assert!(registry.send(1, OutboundEvent::NotificationUpdate {}).await);
        assert_eq!(second_rx.recv().await, Some(OutboundEvent::NotificationUpdate {}));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn superseded_connection_teardown_keeps_successor() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = handle();
        let first_id = first.connection_id;
        let (second, _second_rx) = handle();
        registry.register(1, first).await;
        registry.register(1, second).await;

        registry.unregister(1, first_id).await;

        assert!(registry.is_registered(1).await);
    }

    #[tokio::test]
    async fn unregister_removes_own_entry() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = handle();
        let conn_id = conn.connection_id;
        registry.register(1, conn).await;

        registry.unregister(1, conn_id).await;

        assert!(!registry.is_registered(1).await);
        // no-op when absent
        registry.unregister(1, conn_id).await;
    }

    #[tokio::test]
    async fn concurrent_registers_leave_one_entry() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (sender, _receiver) = mpsc::unbounded_channel();
                registry.register(7, ConnectionHandle::new(sender)).await;
            }));
        }
        for task in tasks {
            task.await.expect("register task should not panic");
        }

        assert_eq!(registry.active_connections().await, 1);
    }
}
