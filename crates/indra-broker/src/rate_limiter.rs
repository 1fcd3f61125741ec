//! Sliding-window rate limiting for REST calls.
//!
//! At most `max_calls` completed acquisitions per rolling `window`.
//! `acquire` blocks cooperatively (async sleep) until the window has room,
//! then records the entry time. One instance per endpoint; no global lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::warn;

/// Sliding-window rate limiter.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    entries: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_calls` per `window`.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            entries: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Whether a call could proceed right now without waiting.
    pub fn has_room(&self) -> bool {
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, self.window);
        entries.len() < self.max_calls
    }

    /// Number of calls recorded in the current window.
    pub fn current_count(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, self.window);
        entries.len()
    }

    /// Wait until the window has room, then record this call.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut entries = self.entries.lock();
                Self::evict(&mut entries, self.window);
                if entries.len() < self.max_calls {
                    entries.push_back(Instant::now());
                    if entries.len() == self.max_calls {
                        warn!(max = self.max_calls, "rate limiter window full");
                    }
                    None
                } else {
                    // Sleep until the oldest entry ages out of the window.
                    entries
                        .front()
                        .map(|&oldest| self.window.saturating_sub(oldest.elapsed()))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d.max(Duration::from_millis(10))).await,
            }
        }
    }

    fn evict(entries: &mut VecDeque<Instant>, window: Duration) {
        let cutoff = Instant::now() - window;
        while entries.front().is_some_and(|&t| t < cutoff) {
            entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_room_under_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        assert!(limiter.has_room());
        assert_eq!(limiter.current_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_records_entries() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.current_count(), 3);
        assert!(limiter.has_room());
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_limit() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(!limiter.has_room());

        // Third acquire must wait for the window to roll.
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
