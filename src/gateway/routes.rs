use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde::Deserialize;

use super::connection;
use crate::protocol::WS_SUBPROTOCOL;
use crate::server::QuizServer;

/// Create the Axum router: WebSocket upgrade plus operational endpoints.
pub fn create_router(cors_origins: &str) -> axum::Router<Arc<QuizServer>> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    axum::Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade. The bearer token rides the upgrade request as
/// `?token=…`; a connection that cannot present a verifiable token is
/// closed with 1008 before any application frame.
async fn websocket_handler(
    State(server): State<Arc<QuizServer>>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match query.token.as_deref() {
        Some(token) => match server.verifier().verify(token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                server.metrics().increment_auth_failures();
                tracing::warn!(client_addr = %addr, error = %err, "Token verification failed");
                None
            }
        },
        None => {
            server.metrics().increment_auth_failures();
            tracing::warn!(client_addr = %addr, "Upgrade request without a token");
            None
        }
    };

    ws.protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| async move {
            match claims {
                Some(claims) => connection::handle_socket(socket, server, claims, addr).await,
                None => connection::close_unauthenticated(socket, &server).await,
            }
        })
}

async fn health_check(State(server): State<Arc<QuizServer>>) -> axum::response::Result<&'static str> {
    if server.health_check().await {
        Ok("OK")
    } else {
        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE.into())
    }
}

async fn metrics_handler(State(server): State<Arc<QuizServer>>) -> Response {
    Json(server.metrics_snapshot()).into_response()
}
