//! Durable persistence behind a single contract.
//!
//! The room driver and server depend only on [`QuizRepository`]; the
//! backend is chosen by configuration. `MemoryRepository` backs tests and
//! single-node development, `PostgresRepository` backs production.

pub mod memory;
pub mod pin;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::protocol::{
    LeaveReason, QuizContent, QuizId, Role, RoomId, RoomSettings, RoomStatus, UserId,
};

/// Tagged repository error. Callers branch on the kind, never on message
/// text; backend details stay in the server log.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("row not found")]
    NotFound,
    #[error("uniqueness conflict")]
    Conflict,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Durable room row.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub pin: String,
    pub quiz_id: QuizId,
    pub host_user_id: UserId,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Durable member row. UNIQUE(room_id, user_id); physically deleted on
/// leave so rejoin never trips the unique key.
#[derive(Debug, Clone)]
pub struct MemberRecord {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Room row plus its members, as loaded for room instantiation.
#[derive(Debug, Clone)]
pub struct LoadedRoom {
    pub room: RoomRecord,
    pub members: Vec<MemberRecord>,
}

/// One user's final standing, persisted after the quiz ends.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub user_id: UserId,
    pub display_name: String,
    pub rank: usize,
    pub score: u32,
    pub correct_answers: u32,
    pub total_answered: u32,
}

/// Storage contract for rooms, members, results, and catalog reads.
#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// Verify connectivity. Schema ownership (migrations, seed data)
    /// belongs to the catalog service and is out of scope here.
    async fn initialize(&self) -> RepoResult<()>;

    /// Insert a room row. Returns `Conflict` when the PIN is already held
    /// by a non-closed room; the caller retries with a fresh PIN.
    async fn create_room(&self, room: &RoomRecord) -> RepoResult<()>;

    /// Find a non-closed room by display PIN.
    async fn lookup_room_by_pin(&self, pin: &str) -> RepoResult<RoomRecord>;

    /// Load a room row together with its members.
    async fn load_room(&self, room_id: RoomId) -> RepoResult<LoadedRoom>;

    /// Insert a member row. Deletes any stale row for the same
    /// (room, user) first so a rejoin can never hit the unique key.
    async fn add_member(&self, member: &MemberRecord) -> RepoResult<()>;

    /// Physically delete a member row.
    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        reason: LeaveReason,
    ) -> RepoResult<()>;

    /// Move host authority in one transaction: the room's host pointer,
    /// the old host's demotion, and the new host's promotion commit
    /// together or not at all.
    async fn transfer_host(
        &self,
        room_id: RoomId,
        old_host: UserId,
        new_host: UserId,
    ) -> RepoResult<()>;

    /// Update the durable room status and lifecycle timestamps.
    async fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()>;

    /// Delete the room row; members cascade.
    async fn delete_room(&self, room_id: RoomId) -> RepoResult<()>;

    /// Persist the final per-user standings.
    async fn persist_final_results(
        &self,
        room_id: RoomId,
        results: &[SessionResult],
    ) -> RepoResult<()>;

    /// Load ordered quiz content from the catalog.
    async fn get_quiz_content(&self, quiz_id: QuizId) -> RepoResult<QuizContent>;

    /// Liveness probe for the health endpoint.
    async fn health_check(&self) -> bool;
}

/// Construct the configured repository backend.
pub async fn create_repository(
    config: &DatabaseConfig,
) -> anyhow::Result<std::sync::Arc<dyn QuizRepository>> {
    match config {
        DatabaseConfig::InMemory => Ok(std::sync::Arc::new(MemoryRepository::new())),
        DatabaseConfig::Postgres {
            url,
            max_connections,
        } => {
            let repo = PostgresRepository::connect(url, *max_connections).await?;
            Ok(std::sync::Arc::new(repo))
        }
    }
}

/// Fresh room row for a newly created room.
pub fn new_room_record(
    quiz_id: QuizId,
    host_user_id: UserId,
    pin: String,
    settings: RoomSettings,
) -> RoomRecord {
    RoomRecord {
        room_id: uuid::Uuid::new_v4(),
        pin,
        quiz_id,
        host_user_id,
        status: RoomStatus::Lobby,
        settings,
        created_at: Utc::now(),
        started_at: None,
        ended_at: None,
    }
}
