use serde::{Deserialize, Serialize};

use super::error_codes::ErrorCode;
use super::types::{
    LeaveReason, MemberSnapshot, Phase, QuizId, RoomId, RoomSettings, UserId,
};

/// Message types sent from client to server, keyed by the envelope's
/// `type` tag with the typed payload under `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a room for a quiz; the authenticated caller becomes host.
    CreateRoom {
        quiz_id: QuizId,
        #[serde(default)]
        settings: RoomSettings,
    },
    /// Join a room by display PIN. Idempotent for a member reconnecting.
    Join { pin: String, display_name: String },
    /// Start the quiz. Host only, lobby only, needs at least two members.
    Start {},
    /// Submit an answer for the current question. `choice` is the option
    /// text (canonical) or the option index rendered as a string.
    Answer { question_index: usize, choice: String },
    /// Leave the current room.
    Leave {},
    /// Remove another member. Host only.
    Kick {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Client-initiated keepalive; answered with `pong` immediately.
    Ping { timestamp: i64 },
    /// Reply to a server-initiated `ping`.
    Pong { timestamp: i64 },
}

impl ClientMessage {
    /// Envelope `type` tags this server understands.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "create_room",
        "join",
        "start",
        "answer",
        "leave",
        "kick",
        "ping",
        "pong",
    ];

    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create_room",
            Self::Join { .. } => "join",
            Self::Start {} => "start",
            Self::Answer { .. } => "answer",
            Self::Leave {} => "leave",
            Self::Kick { .. } => "kick",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Full room snapshot. Sent on every state change and on reconnect.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePayload {
    pub phase: Phase,
    pub room_id: RoomId,
    pub pin: String,
    pub host_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    pub total_questions: usize,
    /// Unix-epoch deadline of the current timed phase, absent in lobby and
    /// terminal phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_deadline_ms: Option<i64>,
    pub members: Vec<MemberSnapshot>,
    pub settings: RoomSettings,
}

/// An active question. Never contains the correct option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
    /// Unix-epoch ms at which answers stop being accepted.
    pub deadline_ms: i64,
    pub duration_ms: u64,
}

/// Per-user outcome for one revealed question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnswerStat {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken_ms: Option<u64>,
    pub score_delta: u32,
}

/// One leaderboard row. Ranks are dense (1..N, no gaps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub display_name: String,
    pub score: u32,
    pub correct_answers: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_time_taken_ms: Option<f64>,
}

/// Post-question reveal: correct option, per-user outcomes, and the
/// current leaderboard. Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealPayload {
    pub index: usize,
    pub correct_choice: String,
    pub correct_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub user_stats: Vec<UserAnswerStat>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Aggregate stats attached to the `end` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizStats {
    pub total_questions: usize,
    pub total_participants: usize,
    pub average_score: f64,
    pub completion_rate: f64,
    pub duration_ms: u64,
}

/// End of quiz: final leaderboard plus aggregates.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndPayload {
    pub final_leaderboard: Vec<LeaderboardEntry>,
    pub quiz_stats: QuizStats,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    State(Box<StatePayload>),
    Joined { user: MemberSnapshot },
    Left { user_id: UserId, reason: LeaveReason },
    Kicked {
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Question(QuestionPayload),
    Reveal(Box<RevealPayload>),
    /// Interim per-user score push. Defined for protocol completeness;
    /// the leaderboard inside `reveal` is authoritative and this server
    /// does not emit it.
    Score {
        user_id: UserId,
        score: u32,
        score_delta: u32,
    },
    End(Box<EndPayload>),
    /// Server-initiated keepalive; the client must reply with `pong`.
    Ping { timestamp: i64 },
    Error {
        code: ErrorCode,
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// Shorthand for an error frame with the code's stock message.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error {
            code,
            msg: code.description().to_string(),
            details: None,
        }
    }

    /// Error frame with a custom human message.
    pub fn error_with_msg(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::Error {
            code,
            msg: msg.into(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn client_message_tags_match_known_types() {
        let msgs = [
            ClientMessage::Join {
                pin: "482913".into(),
                display_name: "Ada".into(),
            },
            ClientMessage::Start {},
            ClientMessage::Answer {
                question_index: 0,
                choice: "42".into(),
            },
            ClientMessage::Leave {},
            ClientMessage::Ping { timestamp: 17 },
        ];
        for msg in msgs {
            assert!(ClientMessage::KNOWN_TYPES.contains(&msg.type_tag()));
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.type_tag());
        }
    }

    #[test]
    fn question_payload_never_leaks_correctness() {
        let payload = QuestionPayload {
            index: 0,
            question: "What is 6 x 7?".into(),
            options: vec!["41".into(), "42".into()],
            deadline_ms: 1_700_000_010_000,
            duration_ms: 10_000,
        };
        let json = serde_json::to_string(&ServerMessage::Question(payload)).unwrap();
        assert!(!json.contains("correct"));
    }

    #[test]
    fn error_frame_shape() {
        let msg = ServerMessage::error(ErrorCode::RoomFull);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "ROOM_FULL");
        assert!(json["data"]["msg"].is_string());
        assert!(json["data"].get("details").is_none());
    }

    #[test]
    fn left_broadcast_round_trips() {
        let user_id = Uuid::new_v4();
        let msg = ServerMessage::Left {
            user_id,
            reason: LeaveReason::Kicked,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::Left { user_id: id, reason } => {
                assert_eq!(id, user_id);
                assert_eq!(reason, LeaveReason::Kicked);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
