//! PIN allocation under collision: the repository rejects duplicate PINs
//! with a conflict and the server retries with fresh PINs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use quiz_room_server::config::Config;
use quiz_room_server::protocol::{
    LeaveReason, Phase, QuizContent, QuizId, QuizQuestion, RoomId, RoomSettings, ServerMessage,
    UserId,
};
use quiz_room_server::repo::{
    LoadedRoom, MemberRecord, MemoryRepository, QuizRepository, RepoResult, RoomRecord,
    SessionResult,
};
use quiz_room_server::protocol::RoomStatus;
use quiz_room_server::room::RoomUser;
use quiz_room_server::server::{QuizServer, ServiceError};

/// Delegating repository that reports a PIN conflict for the first N
/// room inserts, simulating concurrent creates sampling the same PIN.
struct CollidingRepo {
    inner: MemoryRepository,
    conflicts_left: AtomicUsize,
    create_attempts: AtomicUsize,
}

impl CollidingRepo {
    fn new(conflicts: usize) -> Self {
        Self {
            inner: MemoryRepository::new(),
            conflicts_left: AtomicUsize::new(conflicts),
            create_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuizRepository for CollidingRepo {
    async fn initialize(&self) -> RepoResult<()> {
        self.inner.initialize().await
    }

    async fn create_room(&self, room: &RoomRecord) -> RepoResult<()> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(quiz_room_server::repo::RepoError::Conflict);
        }
        self.inner.create_room(room).await
    }

    async fn lookup_room_by_pin(&self, pin: &str) -> RepoResult<RoomRecord> {
        self.inner.lookup_room_by_pin(pin).await
    }

    async fn load_room(&self, room_id: RoomId) -> RepoResult<LoadedRoom> {
        self.inner.load_room(room_id).await
    }

    async fn add_member(&self, member: &MemberRecord) -> RepoResult<()> {
        self.inner.add_member(member).await
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        reason: LeaveReason,
    ) -> RepoResult<()> {
        self.inner.remove_member(room_id, user_id, reason).await
    }

    async fn transfer_host(
        &self,
        room_id: RoomId,
        old_host: UserId,
        new_host: UserId,
    ) -> RepoResult<()> {
        self.inner.transfer_host(room_id, old_host, new_host).await
    }

    async fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        self.inner
            .update_room_status(room_id, status, started_at, ended_at)
            .await
    }

    async fn delete_room(&self, room_id: RoomId) -> RepoResult<()> {
        self.inner.delete_room(room_id).await
    }

    async fn persist_final_results(
        &self,
        room_id: RoomId,
        results: &[SessionResult],
    ) -> RepoResult<()> {
        self.inner.persist_final_results(room_id, results).await
    }

    async fn get_quiz_content(&self, quiz_id: QuizId) -> RepoResult<QuizContent> {
        self.inner.get_quiz_content(quiz_id).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

fn quiz(quiz_id: QuizId) -> QuizContent {
    QuizContent {
        quiz_id,
        title: "one-liner".into(),
        questions: vec![QuizQuestion {
            index: 0,
            prompt: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_index: 1,
            explanation: None,
            duration_ms: None,
        }],
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.security.token_secret = "test-secret".into();
    config
}

fn host(server: &Arc<QuizServer>) -> (RoomUser, mpsc::Receiver<quiz_room_server::hub::Outbound>) {
    let user_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(16);
    server
        .hub()
        .register_connection(user_id, Uuid::new_v4(), tx, CancellationToken::new());
    (
        RoomUser {
            user_id,
            display_name: "host".into(),
        },
        rx,
    )
}

#[tokio::test]
async fn create_retries_past_pin_conflicts() {
    let repo = Arc::new(CollidingRepo::new(3));
    let quiz_id = QuizId::new_v4();
    repo.inner.insert_quiz(quiz(quiz_id)).await;

    let server = QuizServer::with_repo(test_config(), repo.clone());
    let (user, mut rx) = host(&server);

    server
        .create_room(&user, quiz_id, RoomSettings::default())
        .await
        .expect("creation succeeds after retries");
    assert_eq!(repo.create_attempts.load(Ordering::SeqCst), 4);

    // The host still lands in a lobby with a well-formed PIN.
    let out = rx.recv().await.expect("state frame");
    match out.msg.as_ref() {
        ServerMessage::State(state) => {
            assert_eq!(state.phase, Phase::Lobby);
            assert_eq!(state.pin.len(), 6);
            assert!(state.pin.bytes().all(|b| b.is_ascii_digit()));
        }
        other => panic!("expected state, got {other:?}"),
    }
}

#[tokio::test]
async fn create_surfaces_conflict_when_retries_exhaust() {
    let repo = Arc::new(CollidingRepo::new(usize::MAX));
    let quiz_id = QuizId::new_v4();
    repo.inner.insert_quiz(quiz(quiz_id)).await;

    let server = QuizServer::with_repo(test_config(), repo.clone());
    let (user, _rx) = host(&server);

    let err = server
        .create_room(&user, quiz_id, RoomSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PinExhausted));
    assert_eq!(repo.create_attempts.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn concurrent_creates_land_in_distinct_rooms() {
    let repo = Arc::new(MemoryRepository::new());
    let quiz_id = QuizId::new_v4();
    repo.insert_quiz(quiz(quiz_id)).await;
    let server = QuizServer::with_repo(test_config(), repo);

    let (user_a, mut rx_a) = host(&server);
    let (user_b, mut rx_b) = host(&server);

    let (a, b) = tokio::join!(
        server.create_room(&user_a, quiz_id, RoomSettings::default()),
        server.create_room(&user_b, quiz_id, RoomSettings::default()),
    );
    let room_a = a.expect("first creation");
    let room_b = b.expect("second creation");
    assert_ne!(room_a, room_b);

    let pin_of = |out: quiz_room_server::hub::Outbound| match out.msg.as_ref() {
        ServerMessage::State(state) => state.pin.clone(),
        other => panic!("expected state, got {other:?}"),
    };
    let pin_a = pin_of(rx_a.recv().await.expect("state for a"));
    let pin_b = pin_of(rx_b.recv().await.expect("state for b"));
    assert_ne!(pin_a, pin_b, "distinct rooms get distinct PINs");
}
