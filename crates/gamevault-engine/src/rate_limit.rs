//! Per-player purchase throttling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use gamevault_core::UserId;
use tokio::time::Instant;

/// Decides whether a player may attempt another purchase.
pub trait RateLimiter: Send + Sync {
    /// Record an attempt and report whether it is allowed. Rejected attempts
    /// are not recorded.
    fn check_and_record(&self, user_id: UserId) -> bool;

    /// Attempts allowed per window.
    fn max_attempts(&self) -> usize;

    /// Window length.
    fn window(&self) -> Duration;
}

/// Checks between sweeps of idle players.
const SWEEP_EVERY: usize = 1024;

/// Sliding-window limiter: at most `max_attempts` in any `window`.
///
/// Players whose attempts have all left the window are swept every
/// [`SWEEP_EVERY`] checks, so the map holds only recently active players.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: DashMap<UserId, VecDeque<Instant>>,
    checks: AtomicUsize,
}

impl SlidingWindowLimiter {
    /// Limiter allowing `max_attempts` per `window`.
    #[must_use]
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: DashMap::new(),
            checks: AtomicUsize::new(0),
        }
    }

    /// Players currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }

    /// Forget players with no attempt inside the window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.attempts.retain(|_, attempts| {
            attempts
                .back()
                .is_some_and(|at| now.duration_since(*at) < self.window)
        });
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check_and_record(&self, user_id: UserId) -> bool {
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }

        let now = Instant::now();
        let mut attempts = self.attempts.entry(user_id).or_default();
        while attempts
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            attempts.pop_front();
        }
        if attempts.len() >= self.max_attempts {
            let empty = attempts.is_empty();
            drop(attempts);
            if empty {
                self.attempts.remove_if(&user_id, |_, attempts| attempts.is_empty());
            }
            return false;
        }
        attempts.push_back(now);
        true
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_five_per_minute_then_rejects() {
        let limiter = SlidingWindowLimiter::default();
        let user_id = UserId::generate();

        for _ in 0..5 {
            assert!(limiter.check_and_record(user_id));
        }
        assert!(!limiter.check_and_record(user_id));
        assert!(limiter.check_and_record(UserId::generate()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check_and_record(user_id));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_per_attempt() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let user_id = UserId::generate();

        assert!(limiter.check_and_record(user_id));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check_and_record(user_id));
        assert!(!limiter.check_and_record(user_id));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.check_and_record(user_id));
        assert!(!limiter.check_and_record(user_id));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_players_are_forgotten() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.check_and_record(UserId::generate()));
        }
        assert_eq!(limiter.tracked(), 10);

        tokio::time::advance(Duration::from_secs(30)).await;
        let active = UserId::generate();
        assert!(limiter.check_and_record(active));
        limiter.sweep();
        assert_eq!(limiter.tracked(), 11);

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.sweep();
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_sweep_the_map_periodically() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1));
        for _ in 0..SWEEP_EVERY - 1 {
            limiter.check_and_record(UserId::generate());
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(limiter.check_and_record(UserId::generate()));

        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn zero_budget_keeps_no_entries() {
        let limiter = SlidingWindowLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.check_and_record(UserId::generate()));
        assert_eq!(limiter.tracked(), 0);
    }
}
