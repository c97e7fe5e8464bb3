//! Client-facing edge: WebSocket upgrade and authentication, the
//! inbound envelope pipeline, per-connection write draining, and both
//! keepalive directions. The gateway is the only component that talks
//! to clients.

pub mod connection;
pub mod routes;
mod sending;

pub use routes::create_router;
