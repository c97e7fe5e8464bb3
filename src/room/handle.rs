use tokio::sync::{mpsc, oneshot};

use super::command::{RoomCommand, RoomUser};
use super::RoomError;
use crate::protocol::{RoomId, UserId};

/// Cheap-to-clone handle to a running room driver. The hub's room
/// registry stores one per live room.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub(super) fn new(room_id: RoomId, tx: mpsc::Sender<RoomCommand>) -> Self {
        Self { room_id, tx }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    async fn submit<F>(&self, make: F) -> Result<(), RoomError>
    where
        F: FnOnce(oneshot::Sender<Result<(), RoomError>>) -> RoomCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)?
    }

    pub async fn join(&self, user: RoomUser) -> Result<(), RoomError> {
        self.submit(|reply| RoomCommand::Join { user, reply }).await
    }

    pub async fn leave(&self, user_id: UserId) -> Result<(), RoomError> {
        self.submit(|reply| RoomCommand::Leave { user_id, reply })
            .await
    }

    pub async fn start(&self, user_id: UserId) -> Result<(), RoomError> {
        self.submit(|reply| RoomCommand::Start { user_id, reply })
            .await
    }

    pub async fn answer(
        &self,
        user_id: UserId,
        question_index: usize,
        choice: String,
    ) -> Result<(), RoomError> {
        self.submit(|reply| RoomCommand::Answer {
            user_id,
            question_index,
            choice,
            reply,
        })
        .await
    }

    pub async fn kick(
        &self,
        by: UserId,
        target: UserId,
        reason: Option<String>,
    ) -> Result<(), RoomError> {
        self.submit(|reply| RoomCommand::Kick {
            by,
            target,
            reason,
            reply,
        })
        .await
    }

    /// Fire-and-forget presence notification from the hub.
    pub async fn connection_closed(&self, user_id: UserId) {
        let _ = self.tx.send(RoomCommand::ConnectionClosed { user_id }).await;
    }
}
