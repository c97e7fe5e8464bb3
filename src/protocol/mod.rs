//! Wire protocol: envelope codec, message unions, error codes, and the
//! core domain types they carry.
//!
//! Every frame is JSON text of the shape
//! `{ "v": 1, "type": "<tag>", "msg_id": "<opaque>", "room_id": <uuid|null>, "data": { .. } }`.
//! Inbound frames are decoded into a closed tagged union at the edge;
//! unknown tags and schema failures surface as `VALIDATION` errors and
//! never propagate as loose JSON.

pub mod envelope;
pub mod error_codes;
pub mod messages;
pub mod types;

pub use envelope::{decode_client_frame, encode_server_frame, Envelope, ProtocolViolation};

pub use error_codes::ErrorCode;

pub use messages::{
    ClientMessage, EndPayload, LeaderboardEntry, QuestionPayload, QuizStats, RevealPayload,
    ServerMessage, StatePayload, UserAnswerStat,
};

pub use types::{
    resolve_choice, AnswerRecord, LeaveReason, MemberSnapshot, Phase, QuizContent, QuizId,
    QuizQuestion, Role, RoomId, RoomSettings, RoomStatus, UserId, DEFAULT_MAX_PARTICIPANTS,
    PIN_LENGTH, PROTOCOL_VERSION, WS_SUBPROTOCOL,
};
