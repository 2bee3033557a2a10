//! Numeric rules for player progression: scoring, difficulty steps and streak decay.
//!
//! Everything here is pure so the pipeline and the property tests share one definition.

use chrono::{DateTime, Duration, Utc};

use crate::models::user::{UserState, MAX_DIFFICULTY, MIN_DIFFICULTY};

const STREAK_BONUS_PER_ANSWER: f64 = 0.1;
const MAX_STREAK_MULTIPLIER: f64 = 2.0;
const BASE_POINTS_PER_DIFFICULTY: i64 = 10;

/// Moves difficulty one step up on a correct answer and one step down otherwise,
/// always landing inside [1, 10].
pub fn adjust_difficulty(current: u8, correct: bool) -> u8 {
    let next = if correct {
        current.saturating_add(1)
    } else {
        current.saturating_sub(1)
    };
    next.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Points for a correct answer. `streak`, `total_correct` and `total_answered` must
/// already include the answer being scored.
pub fn score_delta(difficulty: u8, streak: u32, total_correct: u32, total_answered: u32) -> i64 {
    let base = (difficulty as i64 * BASE_POINTS_PER_DIFFICULTY) as f64;
    let streak_multiplier =
        (1.0 + STREAK_BONUS_PER_ANSWER * streak as f64).min(MAX_STREAK_MULTIPLIER);
    let accuracy = if total_answered > 0 {
        total_correct as f64 / total_answered as f64
    } else {
        0.0
    };
    let accuracy_multiplier = 0.5 + accuracy;

    (base * streak_multiplier * accuracy_multiplier).floor() as i64
}

/// Streak left after `elapsed` inactivity: one unit lost per full window, floored at 0.
pub fn decayed_streak(streak: u32, elapsed: Duration, window: Duration) -> u32 {
    if window <= Duration::zero() || elapsed < window {
        return streak;
    }
    let periods = elapsed.num_milliseconds() / window.num_milliseconds();
    let periods = u32::try_from(periods).unwrap_or(u32::MAX);
    streak.saturating_sub(periods)
}

/// Applies lazy decay to `user` in place. Returns true when the streak changed.
///
/// Only windows completed after the last checkpoint are charged, so reading the
/// same record repeatedly never takes more than `floor(idle / window)` in total.
/// On change `streak_decayed_at` moves to the end of the last charged window.
pub fn apply_streak_decay(user: &mut UserState, now: DateTime<Utc>, window: Duration) -> bool {
    let Some(last) = user.last_answered_at else {
        return false;
    };
    if window <= Duration::zero() {
        return false;
    }
    let anchor = user.streak_decayed_at.map_or(last, |at| at.max(last));
    let elapsed = now - anchor;
    if elapsed < window {
        return false;
    }

    let periods = elapsed.num_milliseconds() / window.num_milliseconds();
    let decayed = decayed_streak(user.streak, elapsed, window);
    if decayed == user.streak {
        return false;
    }
    user.streak = decayed;
    user.streak_decayed_at = i32::try_from(periods)
        .ok()
        .and_then(|n| window.checked_mul(n))
        .and_then(|charged| anchor.checked_add_signed(charged))
        .or(Some(now));
    true
}

/// Folds one answer into `user` and returns the points awarded (0 when wrong).
///
/// `question_difficulty` is the difficulty of the answered question, not the player's.
pub fn apply_answer(
    user: &mut UserState,
    question_difficulty: u8,
    correct: bool,
    now: DateTime<Utc>,
) -> i64 {
    user.total_answered = user.total_answered.saturating_add(1);

    let delta = if correct {
        user.total_correct = user.total_correct.saturating_add(1);
        user.streak = user.streak.saturating_add(1);
        user.max_streak = user.max_streak.max(user.streak);
        score_delta(
            question_difficulty,
            user.streak,
            user.total_correct,
            user.total_answered,
        )
    } else {
        user.streak = 0;
        0
    };

    user.score = user.score.saturating_add(delta);
    user.current_difficulty = adjust_difficulty(user.current_difficulty, correct);
    user.last_answered_at = Some(now);
    user.streak_decayed_at = None;
    delta
}
