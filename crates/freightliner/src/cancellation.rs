//! Root cancellation handle: every operation in the pipeline carries one of
//! these down from the root. There's no async runtime to thread a `Context`
//! through, so cancellation here is a cheap `Arc<AtomicBool>` flag checked at
//! suspension points (network I/O, backoff sleeps, checkpoint flush) rather
//! than a cancellation token type from an external crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared, cloneable cancellation flag. Cloning shares the same underlying
/// flag; cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `dur`, waking early (in up to `poll_interval` increments) if
    /// cancellation is observed. Used by RetryExecutor-driven backoff sleeps
    /// so a cancel signal has a bounded wake time.
    pub fn sleep_cancellable(&self, dur: Duration, poll_interval: Duration) {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_cancelled() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining.min(poll_interval));
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_cancellable_wakes_early_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            waiter.sleep_cancellable(Duration::from_secs(30), Duration::from_millis(5));
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let elapsed = handle.join().unwrap();
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn sleep_cancellable_runs_full_duration_without_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        token.sleep_cancellable(Duration::from_millis(20), Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
