#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Quiz Room Server
//!
//! Realtime WebSocket server for live multiplayer quiz sessions: rooms
//! joined by PIN, an authoritative per-room game clock, answer grading,
//! scoring with streaks, and host lifecycle.

/// Session token verification
pub mod auth;

/// Server configuration and environment variables
pub mod config;

/// WebSocket edge: upgrade, auth, envelope pipeline, keepalive
pub mod gateway;

/// Connection and room registries with room-scoped fan-out
pub mod hub;

/// Structured logging configuration
pub mod logging;

/// Process counters and the metrics endpoint payload
pub mod metrics;

/// Wire protocol definitions
pub mod protocol;

/// Rate limiting implementation
pub mod rate_limit;

/// Durable persistence behind one repository contract
pub mod repo;

/// The per-room authoritative state machine
pub mod room;

/// Pure scoring, leaderboard, and aggregate-stat functions
pub mod scoring;

/// Top-level server wiring
pub mod server;
