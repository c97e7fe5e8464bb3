use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    LoadedRoom, MemberRecord, QuizRepository, RepoError, RepoResult, RoomRecord, SessionResult,
};
use crate::protocol::{LeaveReason, QuizContent, QuizId, Role, RoomId, RoomStatus, UserId};

/// In-memory repository for tests and single-node development.
///
/// Lock ordering everywhere: `rooms` first, then `pins`, then `members`.
/// Multi-map writes hold every involved lock so no task observes a
/// partially applied room.
pub struct MemoryRepository {
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
    /// PIN -> room id for non-closed rooms only; closed rooms release
    /// their PIN for reuse.
    pins: RwLock<HashMap<String, RoomId>>,
    members: RwLock<HashMap<RoomId, HashMap<UserId, MemberRecord>>>,
    results: RwLock<HashMap<RoomId, Vec<SessionResult>>>,
    quizzes: RwLock<HashMap<QuizId, QuizContent>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            pins: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            quizzes: RwLock::new(HashMap::new()),
        }
    }

    /// Seed quiz content. The catalog service owns authoring in
    /// production; this backs tests and local development.
    pub async fn insert_quiz(&self, quiz: QuizContent) {
        self.quizzes.write().await.insert(quiz.quiz_id, quiz);
    }

    /// Persisted final standings for a room, for test assertions.
    pub async fn final_results(&self, room_id: RoomId) -> Option<Vec<SessionResult>> {
        self.results.read().await.get(&room_id).cloned()
    }

    /// Number of member rows currently stored for a room.
    pub async fn member_count(&self, room_id: RoomId) -> usize {
        self.members
            .read()
            .await
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    /// Current durable room row, for test assertions.
    pub async fn room_row(&self, room_id: RoomId) -> Option<RoomRecord> {
        self.rooms.read().await.get(&room_id).cloned()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuizRepository for MemoryRepository {
    async fn initialize(&self) -> RepoResult<()> {
        Ok(())
    }

    async fn create_room(&self, room: &RoomRecord) -> RepoResult<()> {
        let mut rooms = self.rooms.write().await;
        let mut pins = self.pins.write().await;

        // Uniqueness checked under the write locks, no TOCTOU gap.
        if pins.contains_key(&room.pin) {
            return Err(RepoError::Conflict);
        }
        if rooms.contains_key(&room.room_id) {
            return Err(RepoError::Conflict);
        }

        rooms.insert(room.room_id, room.clone());
        pins.insert(room.pin.clone(), room.room_id);
        Ok(())
    }

    async fn lookup_room_by_pin(&self, pin: &str) -> RepoResult<RoomRecord> {
        let rooms = self.rooms.read().await;
        let pins = self.pins.read().await;
        pins.get(pin)
            .and_then(|room_id| rooms.get(room_id))
            .filter(|room| room.status != RoomStatus::Closed)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn load_room(&self, room_id: RoomId) -> RepoResult<LoadedRoom> {
        let rooms = self.rooms.read().await;
        let members = self.members.read().await;
        let room = rooms.get(&room_id).cloned().ok_or(RepoError::NotFound)?;
        let mut members: Vec<MemberRecord> = members
            .get(&room_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(LoadedRoom { room, members })
    }

    async fn add_member(&self, member: &MemberRecord) -> RepoResult<()> {
        let rooms = self.rooms.read().await;
        if !rooms.contains_key(&member.room_id) {
            return Err(RepoError::NotFound);
        }
        drop(rooms);

        let mut members = self.members.write().await;
        let room_members = members.entry(member.room_id).or_default();
        // Stale-row defense: remove any leftover row before inserting so
        // the (room, user) uniqueness invariant cannot reject a rejoin.
        room_members.remove(&member.user_id);
        room_members.insert(member.user_id, member.clone());
        Ok(())
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        _reason: LeaveReason,
    ) -> RepoResult<()> {
        let mut members = self.members.write().await;
        let removed = members
            .get_mut(&room_id)
            .and_then(|m| m.remove(&user_id))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(RepoError::NotFound)
        }
    }

    async fn transfer_host(
        &self,
        room_id: RoomId,
        old_host: UserId,
        new_host: UserId,
    ) -> RepoResult<()> {
        // Both maps stay locked until every row has changed, mirroring
        // the single transaction the relational backend uses.
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let room = rooms.get_mut(&room_id).ok_or(RepoError::NotFound)?;
        let room_members = members.get_mut(&room_id).ok_or(RepoError::NotFound)?;
        if !room_members.contains_key(&new_host) {
            return Err(RepoError::NotFound);
        }

        room.host_user_id = new_host;
        if let Some(old) = room_members.get_mut(&old_host) {
            old.role = Role::Player;
        }
        if let Some(new) = room_members.get_mut(&new_host) {
            new.role = Role::Host;
        }
        Ok(())
    }

    async fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        let mut rooms = self.rooms.write().await;
        let mut pins = self.pins.write().await;
        let room = rooms.get_mut(&room_id).ok_or(RepoError::NotFound)?;
        room.status = status;
        if started_at.is_some() {
            room.started_at = started_at;
        }
        if ended_at.is_some() {
            room.ended_at = ended_at;
        }
        if status == RoomStatus::Closed {
            pins.remove(&room.pin);
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> RepoResult<()> {
        let mut rooms = self.rooms.write().await;
        let mut pins = self.pins.write().await;
        let mut members = self.members.write().await;

        let room = rooms.remove(&room_id).ok_or(RepoError::NotFound)?;
        pins.remove(&room.pin);
        members.remove(&room_id);
        Ok(())
    }

    async fn persist_final_results(
        &self,
        room_id: RoomId,
        results: &[SessionResult],
    ) -> RepoResult<()> {
        self.results
            .write()
            .await
            .insert(room_id, results.to_vec());
        Ok(())
    }

    async fn get_quiz_content(&self, quiz_id: QuizId) -> RepoResult<QuizContent> {
        self.quizzes
            .read()
            .await
            .get(&quiz_id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomSettings;
    use uuid::Uuid;

    fn room_record(pin: &str) -> RoomRecord {
        super::super::new_room_record(
            Uuid::new_v4(),
            Uuid::new_v4(),
            pin.to_string(),
            RoomSettings::default(),
        )
    }

    fn member(room_id: RoomId, role: Role) -> MemberRecord {
        MemberRecord {
            room_id,
            user_id: Uuid::new_v4(),
            display_name: "player".into(),
            role,
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn pin_collision_is_a_conflict() {
        let repo = MemoryRepository::new();
        repo.create_room(&room_record("482913")).await.unwrap();
        let err = repo.create_room(&room_record("482913")).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict));
    }

    #[tokio::test]
    async fn closed_rooms_release_their_pin() {
        let repo = MemoryRepository::new();
        let room = room_record("482913");
        repo.create_room(&room).await.unwrap();

        repo.update_room_status(room.room_id, RoomStatus::Closed, None, Some(Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            repo.lookup_room_by_pin("482913").await,
            Err(RepoError::NotFound)
        ));

        // The freed PIN can back a new room.
        repo.create_room(&room_record("482913")).await.unwrap();
    }

    #[tokio::test]
    async fn rejoin_after_leave_never_conflicts() {
        let repo = MemoryRepository::new();
        let room = room_record("901234");
        repo.create_room(&room).await.unwrap();

        let m = member(room.room_id, Role::Player);
        repo.add_member(&m).await.unwrap();
        repo.remove_member(room.room_id, m.user_id, LeaveReason::Left)
            .await
            .unwrap();
        repo.add_member(&m).await.unwrap();
        // Stale-row defense: adding over an existing row also succeeds.
        repo.add_member(&m).await.unwrap();
        assert_eq!(repo.member_count(room.room_id).await, 1);
    }

    #[tokio::test]
    async fn transfer_host_updates_all_three_rows() {
        let repo = MemoryRepository::new();
        let mut room = room_record("538201");
        let old_host = member(room.room_id, Role::Host);
        room.host_user_id = old_host.user_id;
        repo.create_room(&room).await.unwrap();
        repo.add_member(&old_host).await.unwrap();
        let new_host = member(room.room_id, Role::Player);
        repo.add_member(&new_host).await.unwrap();

        repo.transfer_host(room.room_id, old_host.user_id, new_host.user_id)
            .await
            .unwrap();

        let loaded = repo.load_room(room.room_id).await.unwrap();
        assert_eq!(loaded.room.host_user_id, new_host.user_id);
        let roles: HashMap<UserId, Role> = loaded
            .members
            .iter()
            .map(|m| (m.user_id, m.role))
            .collect();
        assert_eq!(roles[&old_host.user_id], Role::Player);
        assert_eq!(roles[&new_host.user_id], Role::Host);
    }

    #[tokio::test]
    async fn transfer_to_missing_member_changes_nothing() {
        let repo = MemoryRepository::new();
        let mut room = room_record("538202");
        let host = member(room.room_id, Role::Host);
        room.host_user_id = host.user_id;
        repo.create_room(&room).await.unwrap();
        repo.add_member(&host).await.unwrap();

        let err = repo
            .transfer_host(room.room_id, host.user_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));

        let loaded = repo.load_room(room.room_id).await.unwrap();
        assert_eq!(loaded.room.host_user_id, host.user_id);
    }

    #[tokio::test]
    async fn delete_room_cascades_members() {
        let repo = MemoryRepository::new();
        let room = room_record("246824");
        repo.create_room(&room).await.unwrap();
        repo.add_member(&member(room.room_id, Role::Player))
            .await
            .unwrap();

        repo.delete_room(room.room_id).await.unwrap();
        assert_eq!(repo.member_count(room.room_id).await, 0);
        assert!(matches!(
            repo.load_room(room.room_id).await,
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.lookup_room_by_pin("246824").await,
            Err(RepoError::NotFound)
        ));
    }
}
