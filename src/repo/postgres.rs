use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    LoadedRoom, MemberRecord, QuizRepository, RepoError, RepoResult, RoomRecord, SessionResult,
};
use crate::protocol::{
    LeaveReason, QuizContent, QuizId, QuizQuestion, Role, RoomId, RoomSettings, RoomStatus, UserId,
};

/// Relational repository over Postgres.
///
/// Schema (migrations owned by the catalog service):
/// `rooms(id, pin, quiz_id, host_user_id, status, settings, created_at,
/// started_at, ended_at)` with a unique index on `pin` over non-closed
/// rows; `members(room_id, user_id, display_name, role, joined_at)` with
/// UNIQUE(room_id, user_id) and ON DELETE CASCADE from rooms;
/// `session_results(room_id, user_id, display_name, rank, score,
/// correct_answers, total_answered)`; catalog tables `quizzes` and
/// `questions(quiz_id, idx, prompt, options, correct_index, explanation,
/// duration_ms)`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
        other => RepoError::Unavailable(other.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: Uuid,
    pin: String,
    quiz_id: Uuid,
    host_user_id: Uuid,
    status: String,
    settings: Json<RoomSettings>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RoomRow {
    fn into_record(self) -> RepoResult<RoomRecord> {
        let status = RoomStatus::parse(&self.status)
            .ok_or_else(|| RepoError::Unavailable(format!("bad room status {:?}", self.status)))?;
        Ok(RoomRecord {
            room_id: self.id,
            pin: self.pin,
            quiz_id: self.quiz_id,
            host_user_id: self.host_user_id,
            status,
            settings: self.settings.0,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    room_id: Uuid,
    user_id: Uuid,
    display_name: String,
    role: String,
    joined_at: DateTime<Utc>,
}

impl MemberRow {
    fn into_record(self) -> RepoResult<MemberRecord> {
        let role = match self.role.as_str() {
            "host" => Role::Host,
            "player" => Role::Player,
            other => {
                return Err(RepoError::Unavailable(format!("bad member role {other:?}")));
            }
        };
        Ok(MemberRecord {
            room_id: self.room_id,
            user_id: self.user_id,
            display_name: self.display_name,
            role,
            joined_at: self.joined_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    idx: i32,
    prompt: String,
    options: Json<Vec<String>>,
    correct_index: i32,
    explanation: Option<String>,
    duration_ms: Option<i64>,
}

const SELECT_ROOM: &str = "SELECT id, pin, quiz_id, host_user_id, status, settings, \
     created_at, started_at, ended_at FROM rooms";

#[async_trait]
impl QuizRepository for PostgresRepository {
    async fn initialize(&self) -> RepoResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn create_room(&self, room: &RoomRecord) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO rooms \
             (id, pin, quiz_id, host_user_id, status, settings, created_at, started_at, ended_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(room.room_id)
        .bind(&room.pin)
        .bind(room.quiz_id)
        .bind(room.host_user_id)
        .bind(room.status.as_str())
        .bind(Json(&room.settings))
        .bind(room.created_at)
        .bind(room.started_at)
        .bind(room.ended_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn lookup_room_by_pin(&self, pin: &str) -> RepoResult<RoomRecord> {
        let row = sqlx::query_as::<_, RoomRow>(
            "SELECT id, pin, quiz_id, host_user_id, status, settings, \
             created_at, started_at, ended_at \
             FROM rooms WHERE pin = $1 AND status <> 'closed'",
        )
        .bind(pin)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;
        row.into_record()
    }

    async fn load_room(&self, room_id: RoomId) -> RepoResult<LoadedRoom> {
        let room = sqlx::query_as::<_, RoomRow>(&format!("{SELECT_ROOM} WHERE id = $1"))
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?
            .into_record()?;

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT room_id, user_id, display_name, role, joined_at \
             FROM members WHERE room_id = $1 ORDER BY joined_at ASC, user_id ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_iter()
        .map(MemberRow::into_record)
        .collect::<RepoResult<Vec<_>>>()?;

        Ok(LoadedRoom { room, members })
    }

    async fn add_member(&self, member: &MemberRecord) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Stale-row defense ahead of the unique key on (room_id, user_id).
        sqlx::query("DELETE FROM members WHERE room_id = $1 AND user_id = $2")
            .bind(member.room_id)
            .bind(member.user_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO members (room_id, user_id, display_name, role, joined_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(member.room_id)
        .bind(member.user_id)
        .bind(&member.display_name)
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        _reason: LeaveReason,
    ) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn transfer_host(
        &self,
        room_id: RoomId,
        old_host: UserId,
        new_host: UserId,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let room = sqlx::query("UPDATE rooms SET host_user_id = $2 WHERE id = $1")
            .bind(room_id)
            .bind(new_host)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if room.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        sqlx::query("UPDATE members SET role = 'player' WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(old_host)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let promoted =
            sqlx::query("UPDATE members SET role = 'host' WHERE room_id = $1 AND user_id = $2")
                .bind(room_id)
                .bind(new_host)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        if promoted.rows_affected() == 0 {
            // Dropping the transaction rolls the host pointer back.
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE rooms SET status = $2, \
             started_at = COALESCE($3, started_at), \
             ended_at = COALESCE($4, ended_at) \
             WHERE id = $1",
        )
        .bind(room_id)
        .bind(status.as_str())
        .bind(started_at)
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> RepoResult<()> {
        // Members cascade via the foreign key.
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn persist_final_results(
        &self,
        room_id: RoomId,
        results: &[SessionResult],
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for result in results {
            sqlx::query(
                "INSERT INTO session_results \
                 (room_id, user_id, display_name, rank, score, correct_answers, total_answered) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (room_id, user_id) DO UPDATE SET \
                 rank = EXCLUDED.rank, score = EXCLUDED.score, \
                 correct_answers = EXCLUDED.correct_answers, \
                 total_answered = EXCLUDED.total_answered",
            )
            .bind(room_id)
            .bind(result.user_id)
            .bind(&result.display_name)
            .bind(result.rank as i32)
            .bind(i64::from(result.score))
            .bind(i32::try_from(result.correct_answers).unwrap_or(i32::MAX))
            .bind(i32::try_from(result.total_answered).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn get_quiz_content(&self, quiz_id: QuizId) -> RepoResult<QuizContent> {
        let title_row = sqlx::query("SELECT title FROM quizzes WHERE id = $1")
            .bind(quiz_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;
        let title: String = title_row.try_get("title").map_err(map_sqlx_error)?;

        let questions = sqlx::query_as::<_, QuestionRow>(
            "SELECT idx, prompt, options, correct_index, explanation, duration_ms \
             FROM questions WHERE quiz_id = $1 ORDER BY idx ASC",
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if questions.is_empty() {
            return Err(RepoError::NotFound);
        }

        let questions = questions
            .into_iter()
            .map(|row| QuizQuestion {
                index: row.idx.max(0) as usize,
                prompt: row.prompt,
                options: row.options.0,
                correct_index: row.correct_index.max(0) as usize,
                explanation: row.explanation,
                duration_ms: row.duration_ms.and_then(|ms| u64::try_from(ms).ok()),
            })
            .collect();

        Ok(QuizContent {
            quiz_id,
            title,
            questions,
        })
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
