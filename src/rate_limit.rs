use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::UserId;

/// Sliding-window limits on the operations a user can spam: creating
/// rooms and attempting joins.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_room_creations: usize,
    pub max_join_attempts: usize,
    pub time_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_room_creations: 5,
            max_join_attempts: 20,
            time_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("too many room creations, retry later")]
    RoomCreationLimit,
    #[error("too many join attempts, retry later")]
    JoinAttemptLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Action {
    CreateRoom,
    Join,
}

/// Per-user sliding windows. Entries are pruned on every check, so the
/// map stays proportional to recently active users.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<(UserId, Action), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn check_room_creation(&self, user_id: UserId) -> Result<(), RateLimitError> {
        self.check(
            user_id,
            Action::CreateRoom,
            self.config.max_room_creations,
            RateLimitError::RoomCreationLimit,
        )
    }

    pub fn check_join_attempt(&self, user_id: UserId) -> Result<(), RateLimitError> {
        self.check(
            user_id,
            Action::Join,
            self.config.max_join_attempts,
            RateLimitError::JoinAttemptLimit,
        )
    }

    fn check(
        &self,
        user_id: UserId,
        action: Action,
        limit: usize,
        err: RateLimitError,
    ) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut window = self.windows.entry((user_id, action)).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.config.time_window)
        {
            window.pop_front();
        }
        if window.len() >= limit {
            return Err(err);
        }
        window.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn creation_limit_applies_per_user() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_room_creations: 2,
            max_join_attempts: 2,
            time_window: Duration::from_secs(60),
        });
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.check_room_creation(a).is_ok());
        assert!(limiter.check_room_creation(a).is_ok());
        assert_eq!(
            limiter.check_room_creation(a),
            Err(RateLimitError::RoomCreationLimit)
        );
        // Another user is unaffected, as is another action.
        assert!(limiter.check_room_creation(b).is_ok());
        assert!(limiter.check_join_attempt(a).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_open_again() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_room_creations: 1,
            max_join_attempts: 1,
            time_window: Duration::from_secs(60),
        });
        let user = Uuid::new_v4();
        assert!(limiter.check_room_creation(user).is_ok());
        assert!(limiter.check_room_creation(user).is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check_room_creation(user).is_ok());
    }
}
