use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

/// WebSocket subprotocol identifier negotiated on upgrade.
pub const WS_SUBPROTOCOL: &str = "quiz-protocol";

/// Display PIN length (digits).
pub const PIN_LENGTH: usize = 6;

/// Default participant cap when room settings omit one.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 50;

/// Unique identifier for users (issued by the catalog/user service).
pub type UserId = Uuid;
/// Unique identifier for rooms.
pub type RoomId = Uuid;
/// Unique identifier for quizzes in the catalog.
pub type QuizId = Uuid;

/// Member role inside a room. Exactly one member holds `Host` while the
/// room is not closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Player,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Player => "player",
        }
    }
}

/// Room state-machine position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Question,
    Reveal,
    Intermission,
    Ended,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Question => "question",
            Self::Reveal => "reveal",
            Self::Intermission => "intermission",
            Self::Ended => "ended",
            Self::Closed => "closed",
        }
    }

    /// Phases that carry an armed deadline.
    pub fn is_timed(self) -> bool {
        matches!(self, Self::Question | Self::Reveal | Self::Intermission)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Closed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse durable room status persisted in the rooms table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    Active,
    Ended,
    Closed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lobby" => Some(Self::Lobby),
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Per-room settings chosen by the host at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSettings {
    /// Time budget per question unless the question overrides it.
    #[serde(default = "default_question_duration_ms")]
    pub question_duration_ms: u64,
    /// Length of the post-question reveal window.
    #[serde(default = "default_reveal_duration_ms")]
    pub reveal_duration_ms: u64,
    /// Total between-question pause. Only a value longer than the reveal
    /// window has an effect: the room holds in `intermission` for the
    /// remainder before the next question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermission_duration_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub show_correctness: bool,
    #[serde(default = "default_true")]
    pub show_leaderboard: bool,
    #[serde(default = "default_true")]
    pub allow_reconnect: bool,
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    /// Whether the host submits answers and counts toward completion.
    #[serde(default)]
    pub host_plays: bool,
}

fn default_question_duration_ms() -> u64 {
    20_000
}

fn default_reveal_duration_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_max_participants() -> usize {
    DEFAULT_MAX_PARTICIPANTS
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            question_duration_ms: default_question_duration_ms(),
            reveal_duration_ms: default_reveal_duration_ms(),
            intermission_duration_ms: None,
            show_correctness: true,
            show_leaderboard: true,
            allow_reconnect: true,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            host_plays: false,
        }
    }
}

/// One question of a quiz. `correct_index` never leaves the server during
/// the question phase; the wire-facing payload is built without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub index: usize,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Per-question override of `RoomSettings::question_duration_ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl QuizQuestion {
    pub fn correct_choice(&self) -> &str {
        self.options
            .get(self.correct_index)
            .map_or("", String::as_str)
    }
}

/// Ordered quiz content loaded from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizContent {
    pub quiz_id: QuizId,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

impl QuizContent {
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }
}

/// One answer submitted by a member for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_index: usize,
    pub choice_index: usize,
    pub choice_text: String,
    pub is_correct: bool,
    pub time_taken_ms: u64,
    pub score_delta: u32,
}

/// Wire-facing view of one room member, embedded in `state` snapshots and
/// `joined` broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub is_online: bool,
    pub score: u32,
    pub current_streak: u32,
    pub correct_answers: u32,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// Why a member left, attached to `left` broadcasts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Left,
    Kicked,
    RoomClosed,
}

impl LeaveReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Kicked => "kicked",
            Self::RoomClosed => "room_closed",
        }
    }
}

/// Resolve a raw `answer.choice` against the question options.
///
/// The option text is the canonical form; a numeric string is accepted as
/// an option index when no option text matches it verbatim.
pub fn resolve_choice(options: &[String], raw: &str) -> Option<usize> {
    if let Some(idx) = options.iter().position(|opt| opt == raw) {
        return Some(idx);
    }
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|idx| *idx < options.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let settings: RoomSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.question_duration_ms, 20_000);
        assert_eq!(settings.reveal_duration_ms, 5_000);
        assert_eq!(settings.max_participants, DEFAULT_MAX_PARTICIPANTS);
        assert!(settings.allow_reconnect);
        assert!(!settings.host_plays);
    }

    #[test]
    fn resolve_choice_prefers_option_text() {
        let options = vec!["2".to_string(), "4".to_string(), "8".to_string()];
        // "2" is an option text, so it must not be read as index 2.
        assert_eq!(resolve_choice(&options, "2"), Some(0));
        assert_eq!(resolve_choice(&options, "1"), Some(1));
        assert_eq!(resolve_choice(&options, "8"), Some(2));
        assert_eq!(resolve_choice(&options, "16"), None);
        assert_eq!(resolve_choice(&options, "3"), None);
    }

    #[test]
    fn phase_timedness() {
        assert!(Phase::Question.is_timed());
        assert!(Phase::Reveal.is_timed());
        assert!(Phase::Intermission.is_timed());
        assert!(!Phase::Lobby.is_timed());
        assert!(!Phase::Ended.is_timed());
        assert!(Phase::Closed.is_terminal());
    }

    #[test]
    fn room_status_round_trip() {
        for status in [
            RoomStatus::Lobby,
            RoomStatus::Active,
            RoomStatus::Ended,
            RoomStatus::Closed,
        ] {
            assert_eq!(RoomStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RoomStatus::parse("archived"), None);
    }
}
