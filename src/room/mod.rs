//! The per-room authoritative state machine.
//!
//! Each live room is one driver task consuming a command inbox; every
//! field mutation and every broadcast happens inside the handling of one
//! command, so recipients observe a room's messages in a single total
//! order with no locking inside the room.

pub mod command;
pub mod driver;
pub mod handle;
pub mod state;

pub use command::{RoomCommand, RoomUser};
pub use driver::{spawn_room, RoomTimings};
pub use handle::RoomHandle;
pub use state::{MemberState, RoomState};

use thiserror::Error;

use crate::protocol::{ErrorCode, Phase};

/// Room command failures surfaced to the gateway as `error` frames. The
/// connection always stays open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is closed")]
    Closed,
    #[error("operation is not valid in phase {phase}")]
    WrongPhase { phase: Phase },
    #[error("room is full")]
    Full,
    #[error("only the host may do this")]
    NotHost,
    #[error("not a member of this room")]
    NotMember,
    #[error("starting needs at least two members")]
    NotEnoughMembers,
    #[error("an answer is already recorded for this question")]
    DuplicateAnswer,
    #[error("the host is not playing in this room")]
    HostNotPlaying,
    #[error("answer is for question {submitted}, current is {current}")]
    WrongQuestion { submitted: usize, current: usize },
    #[error("choice does not match any option")]
    InvalidChoice,
    #[error("the host cannot kick themselves")]
    KickSelf,
    #[error("storage rejected the operation")]
    Storage,
    #[error("room is no longer running")]
    Unavailable,
}

impl RoomError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Closed
            | Self::WrongPhase { .. }
            | Self::NotMember
            | Self::NotEnoughMembers
            | Self::DuplicateAnswer
            | Self::WrongQuestion { .. }
            | Self::KickSelf
            | Self::Storage
            | Self::Unavailable => ErrorCode::State,
            Self::Full => ErrorCode::RoomFull,
            Self::NotHost | Self::HostNotPlaying => ErrorCode::Forbidden,
            Self::InvalidChoice => ErrorCode::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_the_wire_taxonomy() {
        assert_eq!(RoomError::Full.error_code(), ErrorCode::RoomFull);
        assert_eq!(RoomError::NotHost.error_code(), ErrorCode::Forbidden);
        assert_eq!(
            RoomError::InvalidChoice.error_code(),
            ErrorCode::Validation
        );
        assert_eq!(
            RoomError::DuplicateAnswer.error_code(),
            ErrorCode::State
        );
        assert_eq!(
            RoomError::WrongPhase {
                phase: Phase::Lobby
            }
            .error_code(),
            ErrorCode::State
        );
    }
}
