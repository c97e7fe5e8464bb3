use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::command::{RoomCommand, RoomUser};
use super::handle::RoomHandle;
use super::state::{MemberState, RoomState};
use super::RoomError;
use crate::hub::Hub;
use crate::metrics::ServerMetrics;
use crate::protocol::{
    resolve_choice, AnswerRecord, EndPayload, LeaveReason, Phase, RevealPayload, Role,
    RoomStatus, ServerMessage, UserAnswerStat, UserId,
};
use crate::repo::{MemberRecord, QuizRepository, RepoError, SessionResult};
use crate::scoring;

/// Server-level timing knobs handed to every room driver.
#[derive(Debug, Clone)]
pub struct RoomTimings {
    /// How long an `ended` room lingers before closing and deleting.
    pub ended_grace: Duration,
}

impl Default for RoomTimings {
    fn default() -> Self {
        Self {
            ended_grace: Duration::from_secs(300),
        }
    }
}

/// Spawn the driver task for a room and return its command handle.
pub fn spawn_room(
    state: RoomState,
    hub: Arc<Hub>,
    repo: Arc<dyn QuizRepository>,
    metrics: Arc<ServerMetrics>,
    timings: RoomTimings,
    inbox_capacity: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
    let handle = RoomHandle::new(state.room_id, tx);
    let driver = RoomDriver {
        state,
        hub,
        repo,
        metrics,
        timings,
        inbox: rx,
    };
    tokio::spawn(driver.run());
    handle
}

/// Single writer for one room: consumes commands sequentially and owns
/// the room's only armed timer. Holds no locks across repository calls;
/// serialization comes from being single-tasked.
struct RoomDriver {
    state: RoomState,
    hub: Arc<Hub>,
    repo: Arc<dyn QuizRepository>,
    metrics: Arc<ServerMetrics>,
    timings: RoomTimings,
    inbox: mpsc::Receiver<RoomCommand>,
}

impl RoomDriver {
    async fn run(mut self) {
        tracing::info!(
            room_id = %self.state.room_id,
            pin = %self.state.pin,
            quiz = %self.state.quiz.title,
            "Room driver started"
        );

        loop {
            let deadline = self.state.deadline;
            tokio::select! {
                cmd = self.inbox.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.metrics.increment_room_commands();
                    self.handle_command(cmd).await;
                }
                () = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.handle_tick().await;
                }
            }
            if self.state.phase == Phase::Closed {
                break;
            }
        }

        tracing::info!(room_id = %self.state.room_id, "Room driver stopped");
    }

    async fn handle_command(&mut self, cmd: RoomCommand) {
        tracing::debug!(
            room_id = %self.state.room_id,
            command = cmd.name(),
            phase = %self.state.phase,
            "Processing room command"
        );
        match cmd {
            RoomCommand::Join { user, reply } => self.handle_join(user, reply).await,
            RoomCommand::Leave { user_id, reply } => self.handle_leave(user_id, reply).await,
            RoomCommand::Start { user_id, reply } => self.handle_start(user_id, reply).await,
            RoomCommand::Answer {
                user_id,
                question_index,
                choice,
                reply,
            } => self.handle_answer(user_id, question_index, choice, reply),
            RoomCommand::Kick {
                by,
                target,
                reason,
                reply,
            } => self.handle_kick(by, target, reason, reply).await,
            RoomCommand::ConnectionClosed { user_id } => {
                if let Some(member) = self.state.members.get_mut(&user_id) {
                    member.is_online = false;
                    tracing::debug!(
                        room_id = %self.state.room_id,
                        %user_id,
                        "Member went offline"
                    );
                }
            }
        }
        if self.state.phase == Phase::Question && self.state.all_eligible_answered() {
            // Everyone who counts has answered; advance without waiting
            // for the deadline.
            self.enter_reveal();
        }
    }

    async fn handle_join(
        &mut self,
        user: RoomUser,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) {
        if self.state.phase == Phase::Closed {
            let _ = reply.send(Err(RoomError::Closed));
            return;
        }
        if self.state.phase == Phase::Ended {
            let _ = reply.send(Err(RoomError::WrongPhase {
                phase: Phase::Ended,
            }));
            return;
        }

        // Reconnect inside the same process: refresh presence and resend
        // the snapshot to the rejoiner only. No `joined` broadcast.
        if let Some(member) = self.state.members.get_mut(&user.user_id) {
            member.is_online = true;
            member.display_name = user.display_name;
            let _ = reply.send(Ok(()));
            self.hub
                .assign_user_room(user.user_id, Some(self.state.room_id));
            self.send_state_to(user.user_id);
            if self.state.phase == Phase::Question {
                self.send_question_to(user.user_id);
            }
            return;
        }

        if self.state.members.len() >= self.state.settings.max_participants {
            let _ = reply.send(Err(RoomError::Full));
            return;
        }

        let member = MemberState::new(user.user_id, user.display_name, Role::Player);
        let record = MemberRecord {
            room_id: self.state.room_id,
            user_id: member.user_id,
            display_name: member.display_name.clone(),
            role: member.role,
            joined_at: member.joined_at,
        };
        let snapshot = member.snapshot();
        self.state.members.insert(member.user_id, member);

        if let Err(err) = self.repo.add_member(&record).await {
            // Undo the in-memory insert; nothing was broadcast yet.
            self.state.members.remove(&record.user_id);
            tracing::warn!(
                room_id = %self.state.room_id,
                user_id = %record.user_id,
                error = %err,
                "Join rolled back after member write failed"
            );
            let _ = reply.send(Err(RoomError::Storage));
            return;
        }

        let _ = reply.send(Ok(()));
        self.hub
            .assign_user_room(record.user_id, Some(self.state.room_id));

        // `joined` then `state` from the same driver step, so no
        // recipient can see the event without the member in the snapshot.
        self.broadcast(ServerMessage::Joined { user: snapshot });
        self.broadcast_state();
        if self.state.phase == Phase::Question {
            self.send_question_to(record.user_id);
        }

        tracing::info!(
            room_id = %self.state.room_id,
            user_id = %record.user_id,
            members = self.state.members.len(),
            "Member joined"
        );
    }

    async fn handle_leave(
        &mut self,
        user_id: UserId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) {
        if !self.state.members.contains_key(&user_id) {
            let _ = reply.send(Err(RoomError::NotMember));
            return;
        }
        self.remove_member(user_id, LeaveReason::Left, None).await;
        // Confirmed only once the removal fully applied, so a caller
        // that leaves and immediately acts again cannot race it.
        let _ = reply.send(Ok(()));
    }

    async fn handle_kick(
        &mut self,
        by: UserId,
        target: UserId,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) {
        if by != self.state.host_user_id {
            let _ = reply.send(Err(RoomError::NotHost));
            return;
        }
        if by == target {
            let _ = reply.send(Err(RoomError::KickSelf));
            return;
        }
        if !self.state.members.contains_key(&target) {
            let _ = reply.send(Err(RoomError::NotMember));
            return;
        }
        self.remove_member(target, LeaveReason::Kicked, reason).await;
        let _ = reply.send(Ok(()));
    }

    /// Shared removal path for leave and kick: physical delete, host
    /// succession, adjacent broadcasts, close-on-empty.
    async fn remove_member(
        &mut self,
        user_id: UserId,
        reason: LeaveReason,
        kick_reason: Option<String>,
    ) {
        // The audience for the departure broadcast includes the leaver.
        let audience = self.state.member_ids();
        let was_host = user_id == self.state.host_user_id;
        self.state.members.remove(&user_id);
        self.hub.assign_user_room(user_id, None);

        if let Err(err) = self
            .repo
            .remove_member(self.state.room_id, user_id, reason)
            .await
        {
            // Live state is authoritative; the loader tolerates a stale
            // row on the next rehydration.
            tracing::warn!(
                room_id = %self.state.room_id,
                %user_id,
                error = %err,
                "Member row delete failed, continuing"
            );
        }

        if self.state.members.is_empty() {
            self.close_room("last member left").await;
            return;
        }

        let mut transferred = false;
        if was_host {
            if let Some(new_host_id) = self.state.next_host().map(|m| m.user_id) {
                match self
                    .repo
                    .transfer_host(self.state.room_id, user_id, new_host_id)
                    .await
                {
                    Ok(()) => {}
                    Err(err) => {
                        // The room must keep exactly one live host; storage
                        // reconciles on the next reload.
                        tracing::warn!(
                            room_id = %self.state.room_id,
                            new_host = %new_host_id,
                            error = %err,
                            "Durable host transfer failed, promoting in memory"
                        );
                    }
                }
                self.state.host_user_id = new_host_id;
                if let Some(member) = self.state.members.get_mut(&new_host_id) {
                    member.role = Role::Host;
                }
                transferred = true;
                tracing::info!(
                    room_id = %self.state.room_id,
                    old_host = %user_id,
                    new_host = %new_host_id,
                    "Host transferred"
                );
            }
        }

        match reason {
            LeaveReason::Kicked => {
                self.hub.broadcast_to_members(
                    self.state.room_id,
                    &audience,
                    ServerMessage::Kicked {
                        user_id,
                        reason: kick_reason,
                    },
                );
            }
            _ => {
                self.hub.broadcast_to_members(
                    self.state.room_id,
                    &audience,
                    ServerMessage::Left { user_id, reason },
                );
            }
        }
        if transferred || reason == LeaveReason::Kicked {
            self.broadcast_state();
        }
    }

    async fn handle_start(
        &mut self,
        user_id: UserId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) {
        if self.state.phase != Phase::Lobby {
            let _ = reply.send(Err(RoomError::WrongPhase {
                phase: self.state.phase,
            }));
            return;
        }
        if !self.state.members.contains_key(&user_id) {
            let _ = reply.send(Err(RoomError::NotMember));
            return;
        }
        if user_id != self.state.host_user_id {
            let _ = reply.send(Err(RoomError::NotHost));
            return;
        }
        if self.state.members.len() < 2 {
            let _ = reply.send(Err(RoomError::NotEnoughMembers));
            return;
        }

        let started_at = Utc::now();
        self.state.started_at = Some(started_at);
        if let Err(err) = self
            .repo
            .update_room_status(self.state.room_id, RoomStatus::Active, Some(started_at), None)
            .await
        {
            tracing::warn!(
                room_id = %self.state.room_id,
                error = %err,
                "Room status update failed on start, continuing"
            );
        }
        let _ = reply.send(Ok(()));

        tracing::info!(
            room_id = %self.state.room_id,
            members = self.state.members.len(),
            questions = self.state.quiz.total_questions(),
            "Quiz started"
        );
        self.begin_question(0);
    }

    fn handle_answer(
        &mut self,
        user_id: UserId,
        question_index: usize,
        choice: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    ) {
        if self.state.phase != Phase::Question {
            let _ = reply.send(Err(RoomError::WrongPhase {
                phase: self.state.phase,
            }));
            return;
        }
        if question_index != self.state.question_index {
            let _ = reply.send(Err(RoomError::WrongQuestion {
                submitted: question_index,
                current: self.state.question_index,
            }));
            return;
        }
        let Some(question) = self.state.current_question().cloned() else {
            let _ = reply.send(Err(RoomError::WrongPhase {
                phase: self.state.phase,
            }));
            return;
        };
        let duration_ms = self.state.current_question_duration_ms();
        let elapsed_ms = self
            .state
            .question_started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();

        if user_id == self.state.host_user_id && !self.state.settings.host_plays {
            let _ = reply.send(Err(RoomError::HostNotPlaying));
            return;
        }
        let Some(member) = self.state.members.get_mut(&user_id) else {
            let _ = reply.send(Err(RoomError::NotMember));
            return;
        };
        if member.answers.contains_key(&question_index) {
            let _ = reply.send(Err(RoomError::DuplicateAnswer));
            return;
        }
        let Some(choice_index) = resolve_choice(&question.options, &choice) else {
            let _ = reply.send(Err(RoomError::InvalidChoice));
            return;
        };

        let is_correct = choice_index == question.correct_index;
        let score_delta = if is_correct {
            let streak_after = member.current_streak + 1;
            scoring::score_delta(elapsed_ms.min(duration_ms), duration_ms, streak_after)
        } else {
            0
        };

        member.total_answered += 1;
        if is_correct {
            member.correct_answers += 1;
            member.current_streak += 1;
            member.max_streak = member.max_streak.max(member.current_streak);
            member.score += score_delta;
        } else {
            member.current_streak = 0;
        }
        member.answers.insert(
            question_index,
            AnswerRecord {
                question_index,
                choice_index,
                choice_text: question.options[choice_index].clone(),
                is_correct,
                time_taken_ms: elapsed_ms,
                score_delta,
            },
        );

        tracing::debug!(
            room_id = %self.state.room_id,
            %user_id,
            question_index,
            is_correct,
            score_delta,
            time_taken_ms = elapsed_ms,
            "Answer recorded"
        );
        let _ = reply.send(Ok(()));
        // The all-answered early advance runs in handle_command once the
        // reply is on its way.
    }

    /// Deadline fired. A stale fire for a phase with no timer is ignored.
    async fn handle_tick(&mut self) {
        match self.state.phase {
            Phase::Question => self.enter_reveal(),
            Phase::Reveal => {
                let reveal_ms = self.state.settings.reveal_duration_ms;
                let extra_ms = self
                    .state
                    .settings
                    .intermission_duration_ms
                    .filter(|total| *total > reveal_ms)
                    .map(|total| total - reveal_ms);
                let has_more =
                    self.state.question_index + 1 < self.state.quiz.total_questions();
                match extra_ms {
                    Some(extra) if has_more => self.enter_intermission(extra),
                    _ => self.next_question_or_end().await,
                }
            }
            Phase::Intermission => self.next_question_or_end().await,
            Phase::Ended => self.close_room("post-quiz grace elapsed").await,
            Phase::Lobby | Phase::Closed => {
                self.clear_deadline();
            }
        }
    }

    fn begin_question(&mut self, index: usize) {
        self.state.phase = Phase::Question;
        self.state.question_index = index;
        self.state.question_started_at = Some(Instant::now());
        let duration = Duration::from_millis(self.state.current_question_duration_ms());
        self.arm_deadline(duration);

        // `state` strictly before `question`: a client must never see a
        // question for a phase it still believes is lobby or reveal.
        self.broadcast_state();
        if let Some(payload) = self.state.question_payload() {
            self.broadcast(ServerMessage::Question(payload));
        }
    }

    fn enter_reveal(&mut self) {
        let Some(question) = self.state.current_question().cloned() else {
            return;
        };
        self.state.phase = Phase::Reveal;
        self.arm_deadline(Duration::from_millis(self.state.settings.reveal_duration_ms));

        let user_stats: Vec<UserAnswerStat> = {
            let host_plays = self.state.settings.host_plays;
            self.state
                .ordered_members()
                .into_iter()
                .filter(|m| host_plays || m.role == Role::Player)
                .map(|m| {
                    let answer = m.answers.get(&self.state.question_index);
                    UserAnswerStat {
                        user_id: m.user_id,
                        display_name: m.display_name.clone(),
                        choice: answer.map(|a| a.choice_text.clone()),
                        is_correct: answer.is_some_and(|a| a.is_correct),
                        time_taken_ms: answer.map(|a| a.time_taken_ms),
                        score_delta: answer.map_or(0, |a| a.score_delta),
                    }
                })
                .collect()
        };
        let leaderboard = scoring::build_leaderboard(&self.state.tallies());

        self.broadcast_state();
        self.broadcast(ServerMessage::Reveal(Box::new(RevealPayload {
            index: self.state.question_index,
            correct_choice: question.correct_choice().to_string(),
            correct_index: question.correct_index,
            explanation: question.explanation.clone(),
            user_stats,
            leaderboard,
        })));
    }

    fn enter_intermission(&mut self, extra: u64) {
        // Reveal without the reveal payload: a plain timed pause.
        self.state.phase = Phase::Intermission;
        self.arm_deadline(Duration::from_millis(extra));
        self.broadcast_state();
    }

    async fn next_question_or_end(&mut self) {
        if self.state.question_index + 1 < self.state.quiz.total_questions() {
            self.begin_question(self.state.question_index + 1);
        } else {
            self.end_quiz().await;
        }
    }

    async fn end_quiz(&mut self) {
        let ended_at = Utc::now();
        self.state.phase = Phase::Ended;
        self.state.ended_at = Some(ended_at);
        self.arm_deadline(self.timings.ended_grace);

        let final_leaderboard = scoring::build_leaderboard(&self.state.tallies());
        let duration_ms = self
            .state
            .started_at
            .map(|started| (ended_at - started).num_milliseconds().max(0) as u64)
            .unwrap_or_default();
        let stats = scoring::quiz_stats(
            &self.state.eligible_tallies(),
            self.state.quiz.total_questions(),
            duration_ms,
        );

        self.broadcast_state();
        self.broadcast(ServerMessage::End(Box::new(EndPayload {
            final_leaderboard: final_leaderboard.clone(),
            quiz_stats: stats,
        })));

        if let Err(err) = self
            .repo
            .update_room_status(self.state.room_id, RoomStatus::Ended, None, Some(ended_at))
            .await
        {
            tracing::warn!(
                room_id = %self.state.room_id,
                error = %err,
                "Room status update failed at quiz end"
            );
        }
        let results: Vec<SessionResult> = final_leaderboard
            .iter()
            .map(|entry| SessionResult {
                user_id: entry.user_id,
                display_name: entry.display_name.clone(),
                rank: entry.rank,
                score: entry.score,
                correct_answers: entry.correct_answers,
                total_answered: self
                    .state
                    .members
                    .get(&entry.user_id)
                    .map_or(0, |m| m.total_answered),
            })
            .collect();
        if let Err(err) = self
            .repo
            .persist_final_results(self.state.room_id, &results)
            .await
        {
            tracing::warn!(
                room_id = %self.state.room_id,
                error = %err,
                "Final results write failed"
            );
        }

        tracing::info!(
            room_id = %self.state.room_id,
            participants = results.len(),
            duration_ms,
            "Quiz ended"
        );
    }

    async fn close_room(&mut self, why: &str) {
        let member_ids = self.state.member_ids();
        self.state.phase = Phase::Closed;
        self.clear_deadline();

        if !member_ids.is_empty() {
            self.broadcast_state();
            for user_id in &member_ids {
                self.hub.assign_user_room(*user_id, None);
            }
        }
        self.hub.remove_room(self.state.room_id);

        match self.repo.delete_room(self.state.room_id).await {
            Ok(()) | Err(RepoError::NotFound) => {}
            Err(err) => {
                tracing::warn!(
                    room_id = %self.state.room_id,
                    error = %err,
                    "Room row delete failed on close"
                );
            }
        }
        self.metrics.increment_rooms_closed();
        tracing::info!(room_id = %self.state.room_id, why, "Room closed");
    }

    fn arm_deadline(&mut self, after: Duration) {
        self.state.deadline = Some(Instant::now() + after);
        self.state.deadline_epoch_ms =
            Some(Utc::now().timestamp_millis() + after.as_millis() as i64);
    }

    fn clear_deadline(&mut self) {
        self.state.deadline = None;
        self.state.deadline_epoch_ms = None;
        self.state.question_started_at = None;
    }

    fn broadcast(&self, msg: ServerMessage) {
        self.hub
            .broadcast_to_members(self.state.room_id, &self.state.member_ids(), msg);
    }

    fn broadcast_state(&self) {
        self.broadcast(ServerMessage::State(Box::new(self.state.state_payload())));
    }

    fn send_state_to(&self, user_id: UserId) {
        self.hub.send_to_user(
            user_id,
            Some(self.state.room_id),
            ServerMessage::State(Box::new(self.state.state_payload())),
        );
    }

    fn send_question_to(&self, user_id: UserId) {
        if let Some(payload) = self.state.question_payload() {
            self.hub.send_to_user(
                user_id,
                Some(self.state.room_id),
                ServerMessage::Question(payload),
            );
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}
