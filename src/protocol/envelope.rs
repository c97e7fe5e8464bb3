use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::error_codes::ErrorCode;
use super::messages::{ClientMessage, ServerMessage};
use super::types::{RoomId, PROTOCOL_VERSION};

/// A decoded inbound frame: envelope fields plus the typed payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub v: u16,
    pub msg_id: String,
    pub room_id: Option<RoomId>,
    pub msg: ClientMessage,
}

/// Why an inbound frame was rejected at the edge. All variants map to a
/// `VALIDATION` error frame; none closes the connection.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("frame is not a JSON object: {0}")]
    Malformed(String),
    #[error("unsupported protocol version {0}, expected {PROTOCOL_VERSION}")]
    UnsupportedVersion(u64),
    #[error("msg_id is required and must be a non-empty string")]
    MissingMsgId,
    #[error("room_id must be a UUID string when present")]
    BadRoomId,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("payload for {kind:?} failed validation: {detail}")]
    BadPayload { kind: String, detail: String },
}

impl ProtocolViolation {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::Validation
    }

    /// Terse client-facing message; internals stay in the server log.
    pub fn user_message(&self) -> String {
        match self {
            Self::Malformed(_) => "Message is not a valid JSON object".to_string(),
            Self::UnsupportedVersion(v) => {
                format!("Unsupported protocol version {v}, expected {PROTOCOL_VERSION}")
            }
            Self::MissingMsgId => "msg_id is required".to_string(),
            Self::BadRoomId => "room_id must be a UUID".to_string(),
            Self::UnknownType(kind) => format!("Unknown message type {kind:?}"),
            Self::BadPayload { kind, .. } => format!("Invalid payload for {kind:?}"),
        }
    }
}

/// Decode a client text frame into a typed envelope.
///
/// Validation happens in envelope order (shape, version, msg_id, room_id,
/// type, payload) so the client sees the first failure, not an arbitrary
/// serde error from deep inside the payload.
pub fn decode_client_frame(text: &str) -> Result<Envelope, ProtocolViolation> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolViolation::Malformed("top-level value is not an object".into()))?;

    let v = obj.get("v").and_then(Value::as_u64).unwrap_or(0);
    if v != u64::from(PROTOCOL_VERSION) {
        return Err(ProtocolViolation::UnsupportedVersion(v));
    }

    let msg_id = obj
        .get("msg_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(ProtocolViolation::MissingMsgId)?
        .to_string();

    let room_id = match obj.get("room_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            Some(Uuid::parse_str(s).map_err(|_| ProtocolViolation::BadRoomId)?)
        }
        Some(_) => return Err(ProtocolViolation::BadRoomId),
    };

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolViolation::UnknownType(String::new()))?;
    if !ClientMessage::KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolViolation::UnknownType(kind.to_string()));
    }

    let tagged = serde_json::json!({
        "type": kind,
        "data": obj.get("data").cloned().unwrap_or(Value::Object(Default::default())),
    });
    let msg: ClientMessage =
        serde_json::from_value(tagged).map_err(|e| ProtocolViolation::BadPayload {
            kind: kind.to_string(),
            detail: e.to_string(),
        })?;

    Ok(Envelope {
        v: PROTOCOL_VERSION,
        msg_id,
        room_id,
        msg,
    })
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    v: u16,
    #[serde(flatten)]
    msg: &'a ServerMessage,
    msg_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<RoomId>,
}

/// Serialize a server message into a wire frame with a fresh `msg_id`.
/// The server never echoes a client message id.
pub fn encode_server_frame(msg: &ServerMessage, room_id: Option<RoomId>) -> String {
    let envelope = OutboundEnvelope {
        v: PROTOCOL_VERSION,
        msg,
        msg_id: Uuid::new_v4().to_string(),
        room_id,
    };
    match serde_json::to_string(&envelope) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize server frame");
            format!(
                "{{\"v\":{PROTOCOL_VERSION},\"type\":\"error\",\"msg_id\":\"{}\",\"data\":{{\"code\":\"STATE\",\"msg\":\"Internal error\"}}}}",
                Uuid::new_v4()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ClientMessage;

    #[test]
    fn decodes_a_valid_join_frame() {
        let frame = r#"{
            "v": 1,
            "type": "join",
            "msg_id": "abc-1",
            "room_id": null,
            "data": { "pin": "482913", "display_name": "Ada" }
        }"#;
        let envelope = decode_client_frame(frame).unwrap();
        assert_eq!(envelope.msg_id, "abc-1");
        assert!(envelope.room_id.is_none());
        match envelope.msg {
            ClientMessage::Join { pin, display_name } => {
                assert_eq!(pin, "482913");
                assert_eq!(display_name, "Ada");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_version() {
        let frame = r#"{"v": 2, "type": "leave", "msg_id": "m1", "data": {}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_missing_version() {
        let frame = r#"{"type": "leave", "msg_id": "m1", "data": {}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn rejects_missing_msg_id() {
        let frame = r#"{"v": 1, "type": "leave", "data": {}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::MissingMsgId)
        ));
        let frame = r#"{"v": 1, "type": "leave", "msg_id": "", "data": {}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::MissingMsgId)
        ));
    }

    #[test]
    fn rejects_unknown_type_without_closing_semantics() {
        let frame = r#"{"v": 1, "type": "dance", "msg_id": "m1", "data": {}}"#;
        match decode_client_frame(frame) {
            Err(violation @ ProtocolViolation::UnknownType(_)) => {
                assert_eq!(violation.error_code(), ErrorCode::Validation);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_payload_schema_failure() {
        let frame = r#"{"v": 1, "type": "answer", "msg_id": "m1", "data": {"question_index": "zero"}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::BadPayload { .. })
        ));
    }

    #[test]
    fn rejects_non_uuid_room_id() {
        let frame = r#"{"v": 1, "type": "leave", "msg_id": "m1", "room_id": "room-7", "data": {}}"#;
        assert!(matches!(
            decode_client_frame(frame),
            Err(ProtocolViolation::BadRoomId)
        ));
    }

    #[test]
    fn leave_tolerates_empty_data() {
        let frame = r#"{"v": 1, "type": "leave", "msg_id": "m1"}"#;
        let envelope = decode_client_frame(frame).unwrap();
        assert!(matches!(envelope.msg, ClientMessage::Leave {}));
    }

    #[test]
    fn server_frames_carry_fresh_msg_ids() {
        let msg = ServerMessage::Pong { timestamp: 9 };
        let a = encode_server_frame(&msg, None);
        let b = encode_server_frame(&msg, None);
        let a: serde_json::Value = serde_json::from_str(&a).unwrap();
        let b: serde_json::Value = serde_json::from_str(&b).unwrap();
        assert_eq!(a["v"], 1);
        assert_eq!(a["type"], "pong");
        assert_ne!(a["msg_id"], b["msg_id"]);
    }

    #[test]
    fn server_frame_carries_room_id_when_present() {
        let room_id = Uuid::new_v4();
        let frame = encode_server_frame(
            &ServerMessage::Pong { timestamp: 1 },
            Some(room_id),
        );
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["room_id"], room_id.to_string());
    }
}
