use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::sending::{
    close_going_away, close_policy_violation, enqueue_error, enqueue_message, send_frame,
};
use crate::auth::SessionClaims;
use crate::hub::Outbound;
use crate::protocol::{
    decode_client_frame, ClientMessage, Envelope, ErrorCode, ServerMessage, UserId,
};
use crate::room::RoomUser;
use crate::server::{QuizServer, ServiceError};

/// Close an upgrade whose token did not verify. The handshake budget
/// bounds how long we spend delivering the close frame.
pub(super) async fn close_unauthenticated(socket: WebSocket, server: &Arc<QuizServer>) {
    let budget = Duration::from_secs(server.config().server.auth_timeout_secs);
    let _ = tokio::time::timeout(budget, close_policy_violation(socket)).await;
}

pub(super) async fn handle_socket(
    socket: WebSocket,
    server: Arc<QuizServer>,
    claims: SessionClaims,
    addr: SocketAddr,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let cfg = server.config().server.clone();
    let user_id = claims.sub;
    let conn_id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel::<Outbound>(cfg.send_queue_capacity.max(1));
    let cancel = CancellationToken::new();
    server
        .hub()
        .register_connection(user_id, conn_id, tx.clone(), cancel.clone());
    tracing::info!(%user_id, %conn_id, client_addr = %addr, "WebSocket connection established");

    // Write side: drain the bounded queue in enqueue order. On
    // cancellation (supersede, stuck queue, server close), flush what is
    // already queued, then close going-away.
    let write_cancel = cancel.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_out = rx.recv() => {
                    let Some(out) = maybe_out else { break };
                    if send_frame(&mut ws_sender, &out).await.is_err() {
                        break;
                    }
                }
                () = write_cancel.cancelled() => {
                    while let Ok(out) = rx.try_recv() {
                        if send_frame(&mut ws_sender, &out).await.is_err() {
                            break;
                        }
                    }
                    close_going_away(&mut ws_sender).await;
                    break;
                }
            }
        }
    });

    // Read side: envelope pipeline plus both keepalive directions and
    // the read idle deadline.
    let read_server = server.clone();
    let read_cancel = cancel.clone();
    let read_tx = tx.clone();
    let read_claims = claims.clone();
    let receive_task = tokio::spawn(async move {
        let idle = Duration::from_secs(cfg.read_idle_timeout_secs);
        let mut read_deadline = Instant::now() + idle;
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(cfg.ping_interval_secs.max(1)));
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The interval fires immediately once; that tick is not a ping.
        ping_interval.tick().await;
        let mut unanswered_pings = 0u32;

        loop {
            tokio::select! {
                () = read_cancel.cancelled() => break,
                () = tokio::time::sleep_until(read_deadline) => {
                    tracing::info!(%user_id, "Read deadline missed, closing");
                    break;
                }
                _ = ping_interval.tick() => {
                    if unanswered_pings >= cfg.max_missed_pongs {
                        tracing::warn!(
                            %user_id,
                            missed = unanswered_pings,
                            "Keepalive miss limit reached, closing"
                        );
                        break;
                    }
                    unanswered_pings += 1;
                    enqueue_message(&read_tx, ServerMessage::Ping {
                        timestamp: chrono::Utc::now().timestamp_millis(),
                    });
                }
                frame = ws_receiver.next() => {
                    let Some(frame) = frame else { break };
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::warn!(%user_id, error = %err, "WebSocket read error");
                            break;
                        }
                    };
                    read_deadline = Instant::now() + idle;

                    match frame {
                        Message::Text(text) => {
                            read_server.metrics().increment_frames_in();
                            if text.len() > cfg.max_message_size {
                                tracing::warn!(
                                    %user_id,
                                    size = text.len(),
                                    max = cfg.max_message_size,
                                    "Oversize frame dropped"
                                );
                                enqueue_error(
                                    &read_tx,
                                    read_server.metrics(),
                                    ErrorCode::Validation,
                                    format!(
                                        "Message too large ({} bytes, max {})",
                                        text.len(),
                                        cfg.max_message_size
                                    ),
                                );
                                continue;
                            }
                            match decode_client_frame(&text) {
                                Ok(envelope) => {
                                    if matches!(envelope.msg, ClientMessage::Pong { .. }) {
                                        unanswered_pings = 0;
                                    }
                                    dispatch_message(
                                        &read_server,
                                        &read_claims,
                                        &read_tx,
                                        envelope,
                                    )
                                    .await;
                                }
                                Err(violation) => {
                                    tracing::debug!(
                                        %user_id,
                                        error = %violation,
                                        "Rejected client frame"
                                    );
                                    enqueue_error(
                                        &read_tx,
                                        read_server.metrics(),
                                        violation.error_code(),
                                        violation.user_message(),
                                    );
                                }
                            }
                        }
                        Message::Close(_) => {
                            tracing::info!(%user_id, "Client closed the connection");
                            break;
                        }
                        Message::Binary(_) => {
                            enqueue_error(
                                &read_tx,
                                read_server.metrics(),
                                ErrorCode::Validation,
                                "This protocol uses text frames only",
                            );
                        }
                        // Transport-level ping/pong is handled by the
                        // WebSocket stack itself.
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {
            tracing::debug!(%user_id, "Send task completed");
        }
        _ = receive_task => {
            tracing::debug!(%user_id, "Receive task completed");
        }
    }
    cancel.cancel();

    // Identity-checked unregister: a stale close never evicts a newer
    // connection. The room only learns about presence, not membership.
    if let Some(room_id) = server.hub().unregister_connection(user_id, conn_id) {
        if let Some(handle) = server.hub().room(room_id) {
            handle.connection_closed(user_id).await;
        }
    }
    tracing::info!(%user_id, %conn_id, "WebSocket connection closed");
}

/// Route one decoded envelope. Every failure becomes an `error` frame on
/// this connection; the connection itself always survives.
async fn dispatch_message(
    server: &Arc<QuizServer>,
    claims: &SessionClaims,
    tx: &mpsc::Sender<Outbound>,
    envelope: Envelope,
) {
    let user_id = claims.sub;
    match envelope.msg {
        ClientMessage::Ping { timestamp } => {
            enqueue_message(tx, ServerMessage::Pong { timestamp });
        }
        ClientMessage::Pong { .. } => {
            // Keepalive bookkeeping happens in the read loop.
        }
        ClientMessage::CreateRoom { quiz_id, settings } => {
            let user = RoomUser {
                user_id,
                display_name: claims.name.clone(),
            };
            if let Err(err) = server.create_room(&user, quiz_id, settings).await {
                send_service_error(server, tx, user_id, "create_room", &err);
            }
        }
        ClientMessage::Join { pin, display_name } => {
            let display_name = if display_name.trim().is_empty() {
                claims.name.clone()
            } else {
                display_name.trim().to_string()
            };
            let user = RoomUser {
                user_id,
                display_name,
            };
            if let Err(err) = server.join_room(&user, pin.trim()).await {
                send_service_error(server, tx, user_id, "join", &err);
            }
        }
        ClientMessage::Start {} => {
            route_to_room(server, tx, user_id, envelope.room_id, "start", |handle| async move {
                handle.start(user_id).await
            })
            .await;
        }
        ClientMessage::Answer {
            question_index,
            choice,
        } => {
            route_to_room(server, tx, user_id, envelope.room_id, "answer", |handle| async move {
                handle.answer(user_id, question_index, choice).await
            })
            .await;
        }
        ClientMessage::Leave {} => {
            route_to_room(server, tx, user_id, envelope.room_id, "leave", |handle| async move {
                handle.leave(user_id).await
            })
            .await;
        }
        ClientMessage::Kick {
            user_id: target,
            reason,
        } => {
            route_to_room(server, tx, user_id, envelope.room_id, "kick", |handle| async move {
                handle.kick(user_id, target, reason).await
            })
            .await;
        }
    }
}

async fn route_to_room<F, Fut>(
    server: &Arc<QuizServer>,
    tx: &mpsc::Sender<Outbound>,
    user_id: UserId,
    envelope_room: Option<crate::protocol::RoomId>,
    operation: &'static str,
    run: F,
) where
    F: FnOnce(crate::room::RoomHandle) -> Fut,
    Fut: std::future::Future<Output = Result<(), crate::room::RoomError>>,
{
    match server.room_for_user(user_id, envelope_room).await {
        Ok(handle) => {
            if let Err(err) = run(handle).await {
                tracing::debug!(%user_id, operation, error = %err, "Room command rejected");
                server.metrics().increment_errors_sent();
                let _ = tx.try_send(Outbound {
                    room_id: None,
                    msg: Arc::new(ServerMessage::error_with_msg(
                        err.error_code(),
                        err.to_string(),
                    )),
                });
            }
        }
        Err(err) => send_service_error(server, tx, user_id, operation, &err),
    }
}

fn send_service_error(
    server: &Arc<QuizServer>,
    tx: &mpsc::Sender<Outbound>,
    user_id: UserId,
    operation: &'static str,
    err: &ServiceError,
) {
    tracing::debug!(%user_id, operation, error = %err, "Request rejected");
    enqueue_error(tx, server.metrics(), err.error_code(), err.to_string());
}
