use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes surfaced to clients in `error` frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing, malformed, or expired session token.
    Unauthorized,
    /// Caller lacks the role required for the operation (e.g. non-host `start`).
    Forbidden,
    /// Unknown PIN or room.
    NotFound,
    /// Bad envelope, unknown message type, or payload schema failure.
    Validation,
    /// Operation not valid in the current phase, duplicate answer,
    /// already-in-room, or a superseded connection.
    State,
    /// Room is at its participant cap.
    RoomFull,
    /// Too many room creations or join attempts in the window.
    RateLimit,
}

impl ErrorCode {
    /// Terse human-readable message paired with the code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Session token is missing, malformed, or expired.",
            Self::Forbidden => "You do not have permission to perform this action.",
            Self::NotFound => "No room matches the given PIN or id.",
            Self::Validation => "The message was malformed or carried an unknown type.",
            Self::State => "The operation is not valid in the room's current state.",
            Self::RoomFull => "The room has reached its participant limit.",
            Self::RateLimit => "Too many requests in a short time. Slow down and retry.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::RoomFull).unwrap(),
            "\"ROOM_FULL\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::RateLimit).unwrap(),
            "\"RATE_LIMIT\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::Validation).unwrap(),
            "\"VALIDATION\""
        );
    }

    #[test]
    fn all_codes_have_descriptions() {
        let codes = [
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::Validation,
            ErrorCode::State,
            ErrorCode::RoomFull,
            ErrorCode::RateLimit,
        ];
        for code in codes {
            assert!(!code.description().is_empty());
        }
    }
}
