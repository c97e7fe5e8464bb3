use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::mpsc;

use crate::hub::Outbound;
use crate::metrics::ServerMetrics;
use crate::protocol::{encode_server_frame, ErrorCode, ServerMessage};

/// Enqueue an `error` frame on this connection's own send queue. A full
/// queue is left to the hub's eviction path; nothing blocks here.
pub(super) fn enqueue_error(
    tx: &mpsc::Sender<Outbound>,
    metrics: &ServerMetrics,
    code: ErrorCode,
    msg: impl Into<String>,
) {
    metrics.increment_errors_sent();
    let _ = tx.try_send(Outbound {
        room_id: None,
        msg: Arc::new(ServerMessage::error_with_msg(code, msg)),
    });
}

pub(super) fn enqueue_message(tx: &mpsc::Sender<Outbound>, msg: ServerMessage) {
    let _ = tx.try_send(Outbound {
        room_id: None,
        msg: Arc::new(msg),
    });
}

/// Serialize and write one frame directly to the socket.
pub(super) async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    out: &Outbound,
) -> Result<(), axum::Error> {
    let frame = encode_server_frame(&out.msg, out.room_id);
    sender.send(Message::Text(frame.into())).await
}

/// Close with 1001: keepalive miss, read idle, or a stuck send queue.
pub(super) async fn close_going_away(sender: &mut SplitSink<WebSocket, Message>) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::AWAY,
            reason: "going away".into(),
        })))
        .await;
}

/// Close with 1008: the connection never authenticated. No application
/// frame precedes the close.
pub(super) async fn close_policy_violation(socket: WebSocket) {
    let mut socket = socket;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "authentication required".into(),
        })))
        .await;
}
