//! Search cancellation: a shared flag polled cooperatively by every search
//! thread, and the sentinel that unwinds the recursion when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raised inside the search when cancellation is observed.
///
/// This is the single canonical cancellation signal. It propagates through
/// every recursive frame via `?` and is caught only at the iterative
/// deepening loop and the root-worker boundary; it must never escape to
/// calling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCancelled;

/// Shared cancellation flag.
///
/// Set by the hard-deadline timer, by an external `stop`, or by the node
/// ceiling. Cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Non-blocking poll.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Poll as a `Result` so search code can unwind with `?`.
    pub fn check(&self) -> Result<(), SearchCancelled> {
        if self.is_cancelled() {
            Err(SearchCancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.check(), Ok(()));
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(SearchCancelled));
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
