//! Process-wide registries: user -> connection and room -> driver handle,
//! plus room-scoped fan-out. The hub never owns game logic; critical
//! sections cover only map operations, never network or storage calls.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::protocol::{ErrorCode, RoomId, ServerMessage, UserId};
use crate::room::RoomHandle;

/// One frame queued toward a connection's write task.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub room_id: Option<RoomId>,
    pub msg: Arc<ServerMessage>,
}

/// Registry entry for one live connection.
struct ConnectionEntry {
    /// Identity of the physical connection; a closing old socket must
    /// not evict a newer one for the same user.
    conn_id: Uuid,
    sender: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    room_id: Option<RoomId>,
}

pub struct Hub {
    connections: DashMap<UserId, ConnectionEntry>,
    rooms: DashMap<RoomId, RoomHandle>,
    /// Per-room construction locks for get-or-load double checking.
    room_locks: DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>,
    metrics: Arc<ServerMetrics>,
}

impl Hub {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            room_locks: DashMap::new(),
            metrics,
        }
    }

    /// Register a connection, superseding any prior connection for the
    /// same user: the old connection receives `error{STATE,
    /// "superseded"}` and is closed before the new one is inserted.
    /// Guarantees at most one live connection per user.
    pub fn register_connection(
        &self,
        user_id: UserId,
        conn_id: Uuid,
        sender: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) {
        let mut inherited_room = None;
        if let Some((_, prev)) = self.connections.remove(&user_id) {
            inherited_room = prev.room_id;
            let _ = prev.sender.try_send(Outbound {
                room_id: prev.room_id,
                msg: Arc::new(ServerMessage::error_with_msg(
                    ErrorCode::State,
                    "superseded",
                )),
            });
            prev.cancel.cancel();
            tracing::info!(%user_id, old_conn = %prev.conn_id, new_conn = %conn_id, "Connection superseded");
        }

        self.connections.insert(
            user_id,
            ConnectionEntry {
                conn_id,
                sender,
                cancel,
                // Membership survives a reconnect; the fresh connection
                // keeps routing to the same room.
                room_id: inherited_room,
            },
        );
        self.metrics.increment_connections();
    }

    /// Remove a connection, but only if the stored identity matches.
    /// Returns the room the connection was assigned to, if any, so the
    /// caller can flag the member offline.
    pub fn unregister_connection(&self, user_id: UserId, conn_id: Uuid) -> Option<RoomId> {
        let removed = self
            .connections
            .remove_if(&user_id, |_, entry| entry.conn_id == conn_id);
        match removed {
            Some((_, entry)) => {
                self.metrics.decrement_connections();
                entry.room_id
            }
            None => None,
        }
    }

    pub fn assign_user_room(&self, user_id: UserId, room_id: Option<RoomId>) {
        if let Some(mut entry) = self.connections.get_mut(&user_id) {
            entry.room_id = room_id;
        }
    }

    pub fn user_room(&self, user_id: UserId) -> Option<RoomId> {
        self.connections
            .get(&user_id)
            .and_then(|entry| entry.room_id)
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Point-to-point send. Dropped silently when the user is offline.
    pub fn send_to_user(&self, user_id: UserId, room_id: Option<RoomId>, msg: ServerMessage) {
        self.enqueue(user_id, room_id, Arc::new(msg));
    }

    /// Room-scoped fan-out over member ids the room enumerated from its
    /// authoritative member map. Offline members are skipped silently.
    pub fn broadcast_to_members(
        &self,
        room_id: RoomId,
        member_ids: &[UserId],
        msg: ServerMessage,
    ) {
        let msg = Arc::new(msg);
        for user_id in member_ids {
            self.enqueue(*user_id, Some(room_id), msg.clone());
        }
    }

    fn enqueue(&self, user_id: UserId, room_id: Option<RoomId>, msg: Arc<ServerMessage>) {
        let Some(entry) = self.connections.get(&user_id) else {
            return;
        };
        match entry.sender.try_send(Outbound { room_id, msg }) {
            Ok(()) => {
                self.metrics.increment_frames_out();
            }
            Err(TrySendError::Full(_)) => {
                // A consumer that cannot drain 256 frames is stuck;
                // evict it rather than stall room broadcasts.
                self.metrics.increment_frames_dropped();
                entry.cancel.cancel();
                tracing::warn!(%user_id, "Send queue full, evicting slow consumer");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn insert_room(&self, handle: RoomHandle) {
        self.rooms.insert(handle.room_id(), handle);
    }

    pub fn room(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.get(&room_id).map(|entry| entry.value().clone())
    }

    pub fn remove_room(&self, room_id: RoomId) {
        self.rooms.remove(&room_id);
        self.room_locks.remove(&room_id);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Construction lock for one room id, shared by concurrent loaders.
    pub fn room_construction_lock(&self, room_id: RoomId) -> Arc<tokio::sync::Mutex<()>> {
        self.room_locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    fn hub() -> Hub {
        Hub::new(Arc::new(ServerMetrics::default()))
    }

    #[tokio::test]
    async fn newer_connection_supersedes_older() {
        let hub = hub();
        let user = Uuid::new_v4();

        let (old_tx, mut old_rx) = mpsc::channel(8);
        let old_cancel = CancellationToken::new();
        let old_conn = Uuid::new_v4();
        hub.register_connection(user, old_conn, old_tx, old_cancel.clone());

        let (new_tx, _new_rx) = mpsc::channel(8);
        let new_conn = Uuid::new_v4();
        hub.register_connection(user, new_conn, new_tx, CancellationToken::new());

        // The old connection saw the superseded error and was cancelled.
        let frame = old_rx.recv().await.expect("superseded frame");
        match frame.msg.as_ref() {
            ServerMessage::Error { code, msg, .. } => {
                assert_eq!(*code, ErrorCode::State);
                assert_eq!(msg, "superseded");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(old_cancel.is_cancelled());

        // The closing old connection must not evict the new one.
        assert_eq!(hub.unregister_connection(user, old_conn), None);
        assert!(hub.is_connected(user));
    }

    #[tokio::test]
    async fn supersede_inherits_room_assignment() {
        let hub = hub();
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();

        let (old_tx, _old_rx) = mpsc::channel(8);
        hub.register_connection(user, Uuid::new_v4(), old_tx, CancellationToken::new());
        hub.assign_user_room(user, Some(room));

        let (new_tx, _new_rx) = mpsc::channel(8);
        hub.register_connection(user, Uuid::new_v4(), new_tx, CancellationToken::new());
        assert_eq!(hub.user_room(user), Some(room));
    }

    #[tokio::test]
    async fn full_send_queue_evicts_the_consumer() {
        let hub = hub();
        let user = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        hub.register_connection(user, Uuid::new_v4(), tx, cancel.clone());

        hub.send_to_user(user, None, ServerMessage::Pong { timestamp: 1 });
        assert!(!cancel.is_cancelled());
        // Queue capacity is 1; the second frame cannot be enqueued.
        hub.send_to_user(user, None, ServerMessage::Pong { timestamp: 2 });
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn broadcast_skips_offline_members() {
        let hub = hub();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register_connection(online, Uuid::new_v4(), tx, CancellationToken::new());

        hub.broadcast_to_members(
            Uuid::new_v4(),
            &[online, offline],
            ServerMessage::Pong { timestamp: 3 },
        );
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
