use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::protocol::{
    AnswerRecord, MemberSnapshot, Phase, QuestionPayload, QuizContent, QuizQuestion, Role, RoomId,
    RoomSettings, StatePayload, UserId,
};
use crate::repo::{LoadedRoom, MemberRecord};
use crate::scoring::MemberTally;

/// Live per-member state owned by the room driver.
#[derive(Debug, Clone)]
pub struct MemberState {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub is_online: bool,
    pub score: u32,
    pub current_streak: u32,
    pub max_streak: u32,
    pub correct_answers: u32,
    pub total_answered: u32,
    /// Answer log keyed by question index.
    pub answers: HashMap<usize, AnswerRecord>,
}

impl MemberState {
    pub fn new(user_id: UserId, display_name: String, role: Role) -> Self {
        Self {
            user_id,
            display_name,
            role,
            joined_at: Utc::now(),
            is_online: true,
            score: 0,
            current_streak: 0,
            max_streak: 0,
            correct_answers: 0,
            total_answered: 0,
            answers: HashMap::new(),
        }
    }

    pub fn from_record(record: &MemberRecord) -> Self {
        Self {
            user_id: record.user_id,
            display_name: record.display_name.clone(),
            role: record.role,
            joined_at: record.joined_at,
            // Loaded members are offline until their connection reappears.
            is_online: false,
            score: 0,
            current_streak: 0,
            max_streak: 0,
            correct_answers: 0,
            total_answered: 0,
            answers: HashMap::new(),
        }
    }

    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            role: self.role,
            is_online: self.is_online,
            score: self.score,
            current_streak: self.current_streak,
            correct_answers: self.correct_answers,
            joined_at: self.joined_at,
        }
    }

    pub fn tally(&self) -> MemberTally {
        MemberTally {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            score: self.score,
            correct_answers: self.correct_answers,
            total_answered: self.total_answered,
            correct_time_ms: self
                .answers
                .values()
                .filter(|answer| answer.is_correct)
                .map(|answer| answer.time_taken_ms)
                .sum(),
        }
    }
}

/// The authoritative live state of one room. Mutated only by the room's
/// driver task.
pub struct RoomState {
    pub room_id: RoomId,
    pub pin: String,
    pub quiz: QuizContent,
    pub host_user_id: UserId,
    pub phase: Phase,
    pub question_index: usize,
    pub settings: RoomSettings,
    pub members: HashMap<UserId, MemberState>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Monotonic start of the current question, the zero point for
    /// `time_taken_ms`.
    pub question_started_at: Option<Instant>,
    /// The single armed timer. The driver is the only entity that arms
    /// or clears it.
    pub deadline: Option<Instant>,
    /// Epoch mirror of `deadline` for wire snapshots.
    pub deadline_epoch_ms: Option<i64>,
}

impl RoomState {
    /// Fresh room created by a host action. The host member row is
    /// already persisted by the caller.
    pub fn new_created(
        room_id: RoomId,
        pin: String,
        quiz: QuizContent,
        host: MemberState,
        settings: RoomSettings,
    ) -> Self {
        let host_user_id = host.user_id;
        let mut members = HashMap::new();
        members.insert(host_user_id, host);
        Self {
            room_id,
            pin,
            quiz,
            host_user_id,
            phase: Phase::Lobby,
            question_index: 0,
            settings,
            members,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            question_started_at: None,
            deadline: None,
            deadline_epoch_ms: None,
        }
    }

    /// Rehydrate a room from durable rows, e.g. after a process restart.
    /// Scores and answer logs do not survive a reload; the quiz resumes
    /// from the lobby.
    pub fn from_loaded(loaded: &LoadedRoom, quiz: QuizContent) -> Self {
        let members: HashMap<UserId, MemberState> = loaded
            .members
            .iter()
            .map(|record| (record.user_id, MemberState::from_record(record)))
            .collect();
        Self {
            room_id: loaded.room.room_id,
            pin: loaded.room.pin.clone(),
            quiz,
            host_user_id: loaded.room.host_user_id,
            phase: Phase::Lobby,
            question_index: 0,
            settings: loaded.room.settings.clone(),
            members,
            created_at: loaded.room.created_at,
            started_at: loaded.room.started_at,
            ended_at: loaded.room.ended_at,
            question_started_at: None,
            deadline: None,
            deadline_epoch_ms: None,
        }
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        self.quiz.questions.get(self.question_index)
    }

    /// Effective answer window for the current question.
    pub fn current_question_duration_ms(&self) -> u64 {
        self.current_question()
            .and_then(|q| q.duration_ms)
            .unwrap_or(self.settings.question_duration_ms)
    }

    /// Members whose answers count: players, plus the host when the
    /// room plays host-inclusive.
    pub fn eligible_players(&self) -> impl Iterator<Item = &MemberState> {
        let host_plays = self.settings.host_plays;
        self.members
            .values()
            .filter(move |m| host_plays || m.role == Role::Player)
    }

    /// True when every eligible player has an answer for the current
    /// question. An empty eligible set never counts as complete.
    pub fn all_eligible_answered(&self) -> bool {
        let mut any = false;
        for member in self.eligible_players() {
            any = true;
            if !member.answers.contains_key(&self.question_index) {
                return false;
            }
        }
        any
    }

    /// Host succession order: smallest `joined_at`, ties broken by user
    /// id ascending. The departing host is expected to be absent from
    /// the member map already.
    pub fn next_host(&self) -> Option<&MemberState> {
        self.members.values().min_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        })
    }

    /// Members in a stable order for wire snapshots (join order).
    pub fn ordered_members(&self) -> Vec<&MemberState> {
        let mut members: Vec<&MemberState> = self.members.values().collect();
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        members
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.keys().copied().collect()
    }

    pub fn state_payload(&self) -> StatePayload {
        StatePayload {
            phase: self.phase,
            room_id: self.room_id,
            pin: self.pin.clone(),
            host_id: self.host_user_id,
            question_index: if self.phase == Phase::Lobby {
                None
            } else {
                Some(self.question_index)
            },
            total_questions: self.quiz.total_questions(),
            phase_deadline_ms: self.deadline_epoch_ms,
            members: self
                .ordered_members()
                .into_iter()
                .map(MemberState::snapshot)
                .collect(),
            settings: self.settings.clone(),
        }
    }

    /// Wire payload for the current question. The correct option never
    /// crosses this boundary.
    pub fn question_payload(&self) -> Option<QuestionPayload> {
        let question = self.current_question()?;
        Some(QuestionPayload {
            index: question.index,
            question: question.prompt.clone(),
            options: question.options.clone(),
            deadline_ms: self.deadline_epoch_ms.unwrap_or_default(),
            duration_ms: self.current_question_duration_ms(),
        })
    }

    pub fn tallies(&self) -> Vec<MemberTally> {
        self.ordered_members()
            .into_iter()
            .map(MemberState::tally)
            .collect()
    }

    pub fn eligible_tallies(&self) -> Vec<MemberTally> {
        let host_plays = self.settings.host_plays;
        self.ordered_members()
            .into_iter()
            .filter(|m| host_plays || m.role == Role::Player)
            .map(MemberState::tally)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QuizId;
    use uuid::Uuid;

    fn quiz() -> QuizContent {
        QuizContent {
            quiz_id: QuizId::new_v4(),
            title: "capitals".into(),
            questions: vec![QuizQuestion {
                index: 0,
                prompt: "Capital of France?".into(),
                options: vec!["Paris".into(), "Lyon".into()],
                correct_index: 0,
                explanation: None,
                duration_ms: Some(8_000),
            }],
        }
    }

    fn room_with_host() -> (RoomState, UserId) {
        let host_id = Uuid::new_v4();
        let host = MemberState::new(host_id, "host".into(), Role::Host);
        let state = RoomState::new_created(
            Uuid::new_v4(),
            "482913".into(),
            quiz(),
            host,
            RoomSettings::default(),
        );
        (state, host_id)
    }

    #[test]
    fn per_question_duration_overrides_settings() {
        let (state, _) = room_with_host();
        assert_eq!(state.current_question_duration_ms(), 8_000);
    }

    #[test]
    fn host_is_not_eligible_by_default() {
        let (mut state, host_id) = room_with_host();
        let player = Uuid::new_v4();
        state
            .members
            .insert(player, MemberState::new(player, "p".into(), Role::Player));

        let eligible: Vec<UserId> = state.eligible_players().map(|m| m.user_id).collect();
        assert_eq!(eligible, vec![player]);

        state.settings.host_plays = true;
        assert_eq!(state.eligible_players().count(), 2);
        assert!(state
            .eligible_players()
            .any(|m| m.user_id == host_id));
    }

    #[test]
    fn all_answered_requires_at_least_one_eligible_player() {
        let (state, _) = room_with_host();
        // Only the non-playing host is present.
        assert!(!state.all_eligible_answered());
    }

    #[test]
    fn next_host_prefers_earliest_join_then_user_id() {
        let (mut state, host_id) = room_with_host();
        state.members.remove(&host_id);

        let early = Uuid::from_u128(9);
        let late = Uuid::from_u128(1);
        let mut first = MemberState::new(early, "early".into(), Role::Player);
        first.joined_at = Utc::now() - chrono::Duration::seconds(10);
        let second = MemberState::new(late, "late".into(), Role::Player);
        state.members.insert(early, first);
        state.members.insert(late, second);

        assert_eq!(state.next_host().map(|m| m.user_id), Some(early));

        // Same join instant: lowest user id wins.
        let joined = Utc::now();
        for member in state.members.values_mut() {
            member.joined_at = joined;
        }
        assert_eq!(state.next_host().map(|m| m.user_id), Some(late));
    }

    #[test]
    fn lobby_state_payload_hides_question_index() {
        let (state, host_id) = room_with_host();
        let payload = state.state_payload();
        assert_eq!(payload.phase, Phase::Lobby);
        assert_eq!(payload.question_index, None);
        assert_eq!(payload.host_id, host_id);
        assert_eq!(payload.total_questions, 1);
        assert_eq!(payload.members.len(), 1);
    }
}
