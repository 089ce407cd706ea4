//! Sliding-window rate limiter for provider calls.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved at the contained instant.
    Reserved(Instant),
    /// The window is full; the oldest entry leaves it after this long.
    Full { retry_in: Duration },
}

/// Counts calls in a trailing window of fixed length.
///
/// Expired timestamps are purged lazily before every admission check.
#[derive(Debug)]
pub struct RateLimiter {
    timestamps: VecDeque<Instant>,
    capacity: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            window,
        }
    }

    /// Reserve a slot at `now` if the window has room.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        self.purge(now);
        if self.timestamps.len() < self.capacity {
            self.timestamps.push_back(now);
            return Admission::Reserved(now);
        }

        let retry_in = self
            .timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default()
            .min(self.window);
        Admission::Full { retry_in }
    }

    /// Give back a reservation that never turned into a call.
    pub fn release(&mut self, reserved_at: Instant) {
        if let Some(pos) = self.timestamps.iter().rposition(|t| *t == reserved_at) {
            self.timestamps.remove(pos);
        }
    }

    /// Calls counted in the window ending at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.purge(now);
        self.timestamps.len()
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(10));
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(matches!(
                limiter.try_acquire(t0 + Duration::from_secs(i)),
                Admission::Reserved(_)
            ));
        }
        assert_eq!(
            limiter.try_acquire(t0 + Duration::from_secs(4)),
            Admission::Full {
                retry_in: Duration::from_secs(6)
            }
        );
    }

    #[test]
    fn slot_frees_when_oldest_leaves_window() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(matches!(limiter.try_acquire(t0), Admission::Reserved(_)));
        assert!(matches!(
            limiter.try_acquire(t0 + Duration::from_secs(9)),
            Admission::Full { .. }
        ));
        assert!(matches!(
            limiter.try_acquire(t0 + Duration::from_secs(10)),
            Admission::Reserved(_)
        ));
    }

    #[test]
    fn release_returns_the_slot() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        let Admission::Reserved(at) = limiter.try_acquire(t0) else {
            panic!("expected a reservation");
        };
        limiter.release(at);
        assert_eq!(limiter.in_window(t0), 0);
        assert!(matches!(limiter.try_acquire(t0), Admission::Reserved(_)));
    }

    #[test]
    fn never_exceeds_capacity_in_any_trailing_window() {
        let capacity = 4;
        let window = Duration::from_millis(1000);
        let mut limiter = RateLimiter::new(capacity, window);
        let t0 = Instant::now();

        // Irregular arrival pattern: bursts, gaps, and steady trickles.
        let offsets_ms: Vec<u64> = (0..400u64)
            .map(|i| i * 37 % 11 + i * 23 + (i / 50) * 900)
            .collect();
        let mut admitted: Vec<Instant> = Vec::new();
        for ms in offsets_ms {
            let now = t0 + Duration::from_millis(ms);
            if let Admission::Reserved(at) = limiter.try_acquire(now) {
                admitted.push(at);
            }
        }

        assert!(!admitted.is_empty());
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| t.saturating_duration_since(*start) < window)
                .count();
            assert!(in_window <= capacity, "window starting at #{i} has {in_window}");
        }
    }
}
