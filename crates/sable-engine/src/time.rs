//! Time management: turn clock parameters into a soft/hard limit pair and
//! arm the hard-deadline timer.
//!
//! The soft limit is advisory, checked between iterative-deepening
//! iterations. The hard limit fires the shared cancel token from a detached
//! timer thread; search threads observe it through their cooperative poll.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::search::control::CancelToken;

/// Search limits as supplied by the caller, all times in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    /// White's remaining clock time.
    pub white_time: i64,
    /// Black's remaining clock time.
    pub black_time: i64,
    /// White's per-move increment.
    pub white_increment: i64,
    /// Black's per-move increment.
    pub black_increment: i64,
    /// Moves until the next time control, 0 when unknown.
    pub moves_to_go: i64,
    /// Fixed time for this move; overrides the clock when positive.
    pub move_time: i64,
    /// Maximum search depth.
    pub depth: Option<i32>,
    /// Maximum node count.
    pub nodes: Option<u64>,
    /// Search until stopped externally.
    pub infinite: bool,
}

/// Reserve kept for the final move so the flag never falls on it.
const LAST_MOVE_RESERVE: i64 = 300;

/// Default and maximum horizon for distributing the remaining time.
const DEFAULT_MOVES_TO_GO: i64 = 50;

/// Compute `(soft, hard)` limits in milliseconds from remaining time,
/// increment, and moves to go.
///
/// The horizon defaults to 50 moves; `safe_moves` shrinks it smoothly as
/// the control approaches so early moves get more time. The hard limit is
/// four soft limits, and both are capped by the reserve and, with more
/// than one move to go, by half the remaining time plus increment.
pub fn time_control_smart(main: i64, increment: i64, moves_to_go: i64) -> (i64, i64) {
    let moves = if moves_to_go == 0 || moves_to_go > DEFAULT_MOVES_TO_GO {
        DEFAULT_MOVES_TO_GO
    } else {
        moves_to_go
    };

    let mut max_limit = main - LAST_MOVE_RESERVE;
    if moves > 1 {
        max_limit = max_limit.min(main / 2 + increment);
    }

    let safe_moves = moves as f64 * (2.0 - moves as f64 / DEFAULT_MOVES_TO_GO as f64);
    let soft = (main as f64 / safe_moves) as i64 + increment;
    let hard = soft * 4;

    (soft.min(max_limit).max(1), hard.min(max_limit).max(1))
}

/// Per-search clock: computes the limit pair, arms the hard-deadline
/// timer, and answers soft-timeout and elapsed-time queries.
#[derive(Debug)]
pub struct TimeManager {
    start: Instant,
    soft: Option<Duration>,
    cancel: CancelToken,
}

impl TimeManager {
    /// Start the clock for a search by the given side. When a hard limit
    /// applies, a detached timer thread fires `cancel` at the deadline.
    pub fn start(limits: &Limits, white_to_move: bool, cancel: CancelToken) -> Self {
        let (main, increment) = if white_to_move {
            (limits.white_time, limits.white_increment)
        } else {
            (limits.black_time, limits.black_increment)
        };

        let (soft, hard) = if limits.move_time > 0 {
            (None, Some(limits.move_time))
        } else if main > 0 && !limits.infinite {
            let (soft, hard) = time_control_smart(main, increment, limits.moves_to_go);
            (Some(soft), Some(hard))
        } else {
            (None, None)
        };

        if let Some(hard_ms) = hard {
            debug!(soft_ms = soft, hard_ms, "time budget");
            let deadline_token = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(hard_ms as u64));
                deadline_token.cancel();
            });
        }

        Self {
            start: Instant::now(),
            soft: soft.map(|ms| Duration::from_millis(ms as u64)),
            cancel,
        }
    }

    /// Whether the advisory soft limit has elapsed.
    pub fn is_soft_timeout(&self) -> bool {
        match self.soft {
            Some(soft) => self.start.elapsed() >= soft,
            None => false,
        }
    }

    /// Milliseconds since the search started.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// The cancel token enforcing the hard deadline.
    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }
}
