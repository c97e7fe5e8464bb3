//! Pure scoring functions: answer grading, score deltas, streaks,
//! leaderboard ordering, and end-of-quiz aggregates.
//!
//! Nothing here performs I/O or holds state; the room driver feeds in
//! member tallies and applies the results.

use crate::protocol::{LeaderboardEntry, QuizStats, UserId};

/// Base value of a correct answer.
pub const BASE_SCORE: f64 = 1000.0;
/// Fraction of the base lost by answering at the deadline.
pub const TIME_PENALTY: f64 = 0.5;
/// Bonus per consecutive correct answer beyond the first.
pub const STREAK_STEP: f64 = 0.1;
/// Streak bonus stops growing at five in a row.
pub const STREAK_CAP: u32 = 4;

/// Multiplier applied for the current streak, counted after the answer
/// being scored was credited. Caps at x1.4 for five in a row.
pub fn streak_multiplier(streak_after: u32) -> f64 {
    let steps = streak_after.saturating_sub(1).min(STREAK_CAP);
    1.0 + STREAK_STEP * f64::from(steps)
}

/// Score delta for a correct answer submitted at `time_taken_ms` within a
/// question window of `duration_ms`. An instant answer is worth 1000, one
/// at the deadline 500, scaled by the streak multiplier.
pub fn score_delta(time_taken_ms: u64, duration_ms: u64, streak_after: u32) -> u32 {
    if duration_ms == 0 {
        return 0;
    }
    let fraction = (time_taken_ms as f64 / duration_ms as f64).clamp(0.0, 1.0);
    let raw = BASE_SCORE * (1.0 - TIME_PENALTY * fraction) * streak_multiplier(streak_after);
    raw.round() as u32
}

/// Everything the leaderboard needs to know about one member.
#[derive(Debug, Clone)]
pub struct MemberTally {
    pub user_id: UserId,
    pub display_name: String,
    pub score: u32,
    pub correct_answers: u32,
    pub total_answered: u32,
    /// Sum of `time_taken_ms` across correct answers.
    pub correct_time_ms: u64,
}

impl MemberTally {
    /// Mean time across correct answers. The tie-break compares members
    /// with equal correct counts, so the averages cover the same number
    /// of questions; with zero correct answers both sides are `None` and
    /// the ordering falls through to user id.
    pub fn avg_time_ms(&self) -> Option<f64> {
        if self.correct_answers == 0 {
            None
        } else {
            Some(self.correct_time_ms as f64 / f64::from(self.correct_answers))
        }
    }
}

/// Sort members into the canonical leaderboard order
/// `(score desc, correct desc, avg_time asc, user_id asc)` and assign
/// dense 1..N ranks. The same ordering backs every `reveal` and the final
/// `end` payload.
pub fn build_leaderboard(members: &[MemberTally]) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&MemberTally> = members.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.correct_answers.cmp(&a.correct_answers))
            .then_with(|| {
                let a_avg = a.avg_time_ms().unwrap_or(f64::INFINITY);
                let b_avg = b.avg_time_ms().unwrap_or(f64::INFINITY);
                a_avg.total_cmp(&b_avg)
            })
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    sorted
        .into_iter()
        .enumerate()
        .map(|(idx, member)| LeaderboardEntry {
            rank: idx + 1,
            user_id: member.user_id,
            display_name: member.display_name.clone(),
            score: member.score,
            correct_answers: member.correct_answers,
            avg_time_taken_ms: member.avg_time_ms(),
        })
        .collect()
}

/// End-of-quiz aggregates over the eligible players (everyone scored for
/// completion: non-host members, or all members when the host plays).
pub fn quiz_stats(
    eligible: &[MemberTally],
    total_questions: usize,
    duration_ms: u64,
) -> QuizStats {
    let total_participants = eligible.len();
    let average_score = if total_participants == 0 {
        0.0
    } else {
        eligible.iter().map(|m| f64::from(m.score)).sum::<f64>() / total_participants as f64
    };
    let completion_rate = if total_participants == 0 || total_questions == 0 {
        0.0
    } else {
        let answered: u32 = eligible.iter().map(|m| m.total_answered).sum();
        f64::from(answered) / (total_participants as f64 * total_questions as f64)
    };

    QuizStats {
        total_questions,
        total_participants,
        average_score,
        completion_rate,
        duration_ms,
    }
}
