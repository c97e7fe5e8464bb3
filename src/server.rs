use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::hub::Hub;
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::protocol::{ErrorCode, QuizId, Role, RoomId, RoomSettings, RoomStatus, UserId};
use crate::rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
use crate::repo::{self, MemberRecord, QuizRepository, RepoError};
use crate::room::{spawn_room, MemberState, RoomError, RoomHandle, RoomState, RoomTimings, RoomUser};

/// Failures from the server-level entry points (create, join, routing),
/// surfaced to clients as `error` frames.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("no room matches")]
    NotFound,
    #[error("already in a room")]
    AlreadyInRoom,
    #[error("could not allocate a room PIN, try again")]
    PinExhausted,
    #[error("storage rejected the operation")]
    Storage,
}

impl ServiceError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Room(err) => err.error_code(),
            Self::RateLimited(_) => ErrorCode::RateLimit,
            Self::NotFound => ErrorCode::NotFound,
            // Transient storage detail stays server-side; the client
            // sees a generic state error.
            Self::AlreadyInRoom | Self::PinExhausted | Self::Storage => ErrorCode::State,
        }
    }
}

/// Top-level wiring: configuration, hub, repository, token verifier,
/// rate limiter, metrics. Gateway handlers call into this; rooms run
/// their own drivers.
pub struct QuizServer {
    config: Arc<Config>,
    hub: Arc<Hub>,
    repo: Arc<dyn QuizRepository>,
    verifier: TokenVerifier,
    rate_limiter: RateLimiter,
    metrics: Arc<ServerMetrics>,
}

impl QuizServer {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let repo = repo::create_repository(&config.database).await?;
        repo.initialize()
            .await
            .map_err(|err| anyhow::anyhow!("storage initialization failed: {err}"))?;
        Ok(Self::with_repo(config, repo))
    }

    /// Assemble around an existing repository. Tests use this to share a
    /// seeded in-memory backend with the server.
    pub fn with_repo(config: Config, repo: Arc<dyn QuizRepository>) -> Arc<Self> {
        let metrics = Arc::new(ServerMetrics::default());
        let hub = Arc::new(Hub::new(metrics.clone()));
        let verifier = TokenVerifier::new(config.security.token_secret.clone().into_bytes());
        let rate_limiter = RateLimiter::new(RateLimitConfig {
            max_room_creations: config.rate_limit.max_room_creations,
            max_join_attempts: config.rate_limit.max_join_attempts,
            time_window: Duration::from_secs(config.rate_limit.time_window_secs),
        });
        Arc::new(Self {
            config: Arc::new(config),
            hub,
            repo,
            verifier,
            rate_limiter,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub async fn health_check(&self) -> bool {
        self.repo.health_check().await
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.hub.room_count())
    }

    fn timings(&self) -> RoomTimings {
        RoomTimings {
            ended_grace: Duration::from_secs(self.config.server.ended_room_grace_secs),
        }
    }

    /// Create a room: allocate a PIN (retrying on collision), persist the
    /// row and the host membership, spawn the driver, and hand the host
    /// their first `state` snapshot.
    pub async fn create_room(
        &self,
        user: &RoomUser,
        quiz_id: QuizId,
        settings: RoomSettings,
    ) -> Result<RoomId, ServiceError> {
        self.rate_limiter.check_room_creation(user.user_id)?;

        // Creation is never idempotent: a repeat create abandons the
        // caller's current room and allocates a fresh one.
        if let Some(current) = self.hub.user_room(user.user_id) {
            if let Ok(handle) = self.get_or_load_room(current).await {
                let _ = handle.leave(user.user_id).await;
            }
            self.hub.assign_user_room(user.user_id, None);
        }

        let quiz = self.repo.get_quiz_content(quiz_id).await.map_err(|err| {
            match err {
                RepoError::NotFound => ServiceError::NotFound,
                other => {
                    tracing::error!(%quiz_id, error = %other, "Quiz load failed");
                    ServiceError::Storage
                }
            }
        })?;

        let mut created = None;
        for attempt in 0..self.config.server.pin_allocation_retries {
            let pin = repo::pin::generate_pin();
            let candidate =
                repo::new_room_record(quiz_id, user.user_id, pin, settings.clone());
            match self.repo.create_room(&candidate).await {
                Ok(()) => {
                    created = Some(candidate);
                    break;
                }
                Err(RepoError::Conflict) => {
                    tracing::debug!(attempt, "PIN collision, sampling a new one");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Room row insert failed");
                    return Err(ServiceError::Storage);
                }
            }
        }
        let Some(record) = created else {
            tracing::warn!(
                retries = self.config.server.pin_allocation_retries,
                "PIN allocation exhausted its retries"
            );
            return Err(ServiceError::PinExhausted);
        };

        let host = MemberState::new(user.user_id, user.display_name.clone(), Role::Host);
        let host_record = MemberRecord {
            room_id: record.room_id,
            user_id: host.user_id,
            display_name: host.display_name.clone(),
            role: Role::Host,
            joined_at: host.joined_at,
        };
        if let Err(err) = self.repo.add_member(&host_record).await {
            tracing::error!(room_id = %record.room_id, error = %err, "Host member insert failed");
            let _ = self.repo.delete_room(record.room_id).await;
            return Err(ServiceError::Storage);
        }

        let room_id = record.room_id;
        let state =
            RoomState::new_created(room_id, record.pin.clone(), quiz, host, settings);
        let handle = spawn_room(
            state,
            self.hub.clone(),
            self.repo.clone(),
            self.metrics.clone(),
            self.timings(),
            self.config.server.room_inbox_capacity,
        );
        self.hub.insert_room(handle.clone());
        self.metrics.increment_rooms_created();
        tracing::info!(
            %room_id,
            pin = %record.pin,
            host = %user.user_id,
            "Room created"
        );

        // The join command walks the reconnect path: the host is already
        // a member, so they get a fresh `state` and no `joined` broadcast.
        handle.join(user.clone()).await?;
        Ok(room_id)
    }

    /// Join by PIN, loading the room into memory if needed.
    pub async fn join_room(&self, user: &RoomUser, pin: &str) -> Result<RoomId, ServiceError> {
        self.rate_limiter.check_join_attempt(user.user_id)?;

        let row = self.repo.lookup_room_by_pin(pin).await.map_err(|err| match err {
            RepoError::NotFound => ServiceError::NotFound,
            other => {
                tracing::error!(pin, error = %other, "PIN lookup failed");
                ServiceError::Storage
            }
        })?;

        if let Some(current) = self.hub.user_room(user.user_id) {
            if current != row.room_id {
                return Err(ServiceError::AlreadyInRoom);
            }
        }

        let handle = self.get_or_load_room(row.room_id).await?;
        handle.join(user.clone()).await?;
        Ok(row.room_id)
    }

    /// Double-checked get-or-load: the registry is consulted, the room's
    /// construction lock taken, the registry consulted again, and only
    /// then is durable state loaded and a driver spawned.
    pub async fn get_or_load_room(&self, room_id: RoomId) -> Result<RoomHandle, ServiceError> {
        if let Some(handle) = self.hub.room(room_id) {
            return Ok(handle);
        }
        let lock = self.hub.room_construction_lock(room_id);
        let _guard = lock.lock().await;
        if let Some(handle) = self.hub.room(room_id) {
            return Ok(handle);
        }

        let loaded = self.repo.load_room(room_id).await.map_err(|err| match err {
            RepoError::NotFound => ServiceError::NotFound,
            other => {
                tracing::error!(%room_id, error = %other, "Room load failed");
                ServiceError::Storage
            }
        })?;
        if loaded.room.status == RoomStatus::Closed {
            return Err(ServiceError::NotFound);
        }
        let quiz = self
            .repo
            .get_quiz_content(loaded.room.quiz_id)
            .await
            .map_err(|err| match err {
                RepoError::NotFound => ServiceError::NotFound,
                other => {
                    tracing::error!(%room_id, error = %other, "Quiz load failed");
                    ServiceError::Storage
                }
            })?;

        let state = RoomState::from_loaded(&loaded, quiz);
        let handle = spawn_room(
            state,
            self.hub.clone(),
            self.repo.clone(),
            self.metrics.clone(),
            self.timings(),
            self.config.server.room_inbox_capacity,
        );
        self.hub.insert_room(handle.clone());
        tracing::info!(%room_id, "Room rehydrated from storage");
        Ok(handle)
    }

    /// Resolve the room a command applies to: the hub's assignment for
    /// the user, falling back to the envelope's room id.
    pub async fn room_for_user(
        &self,
        user_id: UserId,
        envelope_room: Option<RoomId>,
    ) -> Result<RoomHandle, ServiceError> {
        let room_id = self
            .hub
            .user_room(user_id)
            .or(envelope_room)
            .ok_or(ServiceError::NotFound)?;
        self.get_or_load_room(room_id).await
    }
}
