use tokio::sync::oneshot;

use super::RoomError;
use crate::protocol::UserId;

/// A user identity attached to room commands, cached from the session
/// token at the gateway.
#[derive(Debug, Clone)]
pub struct RoomUser {
    pub user_id: UserId,
    pub display_name: String,
}

/// Commands consumed sequentially by the room driver. Every state
/// mutation and every broadcast happens inside the handling of exactly
/// one command.
#[derive(Debug)]
pub enum RoomCommand {
    /// Add a member, or refresh an existing membership (reconnect).
    Join {
        user: RoomUser,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Explicit leave.
    Leave {
        user_id: UserId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Host starts the quiz from the lobby.
    Start {
        user_id: UserId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Answer the current question.
    Answer {
        user_id: UserId,
        question_index: usize,
        choice: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Host removes another member.
    Kick {
        by: UserId,
        target: UserId,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// A member's connection went away; presence only, no membership
    /// change.
    ConnectionClosed { user_id: UserId },
}

impl RoomCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Start { .. } => "start",
            Self::Answer { .. } => "answer",
            Self::Kick { .. } => "kick",
            Self::ConnectionClosed { .. } => "connection_closed",
        }
    }
}
