//! Circuit breaker for the generative provider.
//!
//! ```text
//!            threshold reached                 reset timeout elapsed
//!  CLOSED ─────────────────────▶ OPEN ─────────────────────────▶ HALF_OPEN
//!    ▲                            ▲                                │
//!    │        trial success       │        trial failure           │
//!    └────────────────────────────┼────────────────────────────────┤
//!                                 └────────────────────────────────┘
//! ```
//!
//! Every transition bumps a generation counter. Callers get a [`Permit`]
//! stamped with the generation it was issued under, and outcomes reported
//! with a stale permit are dropped, so a call that straddles a transition
//! can never rewrite the newer state.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Permission to issue one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
    trial: bool,
}

impl Permit {
    /// Whether this is the single HALF_OPEN probe.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Why a call was not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    /// Cooling down; the contained duration remains until a probe is allowed.
    Open { remaining: Duration },
    /// A probe is already in flight.
    TrialInFlight,
}

/// Configuration for the breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker state. Not synchronized; the owner provides the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    generation: u64,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            generation: 0,
            trial_in_flight: false,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Ask for permission to call the provider.
    pub fn acquire(&mut self, now: Instant) -> Result<Permit, Denied> {
        match self.status {
            BreakerStatus::Closed => Ok(Permit {
                generation: self.generation,
                trial: false,
            }),
            BreakerStatus::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < self.config.reset_timeout {
                    return Err(Denied::Open {
                        remaining: self.config.reset_timeout - elapsed,
                    });
                }
                self.transition(BreakerStatus::HalfOpen);
                info!("Circuit breaker half-open, allowing one trial call");
                self.trial_in_flight = true;
                Ok(Permit {
                    generation: self.generation,
                    trial: true,
                })
            }
            BreakerStatus::HalfOpen => {
                if self.trial_in_flight {
                    return Err(Denied::TrialInFlight);
                }
                self.trial_in_flight = true;
                Ok(Permit {
                    generation: self.generation,
                    trial: true,
                })
            }
        }
    }

    /// Report a successful call. Returns `false` if the permit was stale.
    pub fn record_success(&mut self, permit: Permit) -> bool {
        if !self.is_current(permit) {
            return false;
        }
        self.consecutive_failures = 0;
        if self.status == BreakerStatus::HalfOpen {
            self.trial_in_flight = false;
            self.opened_at = None;
            self.transition(BreakerStatus::Closed);
            info!("Circuit breaker closed after successful trial");
        }
        true
    }

    /// Report a transient failure. Returns `false` if the permit was stale.
    ///
    /// The failure count and the threshold transition are updated together.
    pub fn record_failure(&mut self, permit: Permit, now: Instant) -> bool {
        if !self.is_current(permit) {
            return false;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.status {
            BreakerStatus::HalfOpen => {
                self.trial_in_flight = false;
                self.opened_at = Some(now);
                self.transition(BreakerStatus::Open);
                warn!("Circuit breaker trial failed, reopening");
            }
            BreakerStatus::Closed
                if self.consecutive_failures >= self.config.failure_threshold =>
            {
                self.opened_at = Some(now);
                self.transition(BreakerStatus::Open);
                warn!(
                    failures = self.consecutive_failures,
                    reset_after = ?self.config.reset_timeout,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
        true
    }

    /// Hand back a permit whose call ended without a verdict on provider
    /// health (non-retryable failure). Counters are untouched; a trial slot
    /// becomes available again.
    pub fn release(&mut self, permit: Permit) {
        if self.is_current(permit) && permit.trial {
            self.trial_in_flight = false;
        }
    }

    fn is_current(&self, permit: Permit) -> bool {
        permit.generation == self.generation
    }

    fn transition(&mut self, to: BreakerStatus) {
        self.status = to;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(reset_secs),
        })
    }

    #[test]
    fn starts_closed() {
        let mut b = breaker(3, 30);
        assert_eq!(b.status(), BreakerStatus::Closed);
        assert!(b.acquire(Instant::now()).is_ok());
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let mut b = breaker(3, 30);
        let now = Instant::now();
        for i in 1..=3 {
            let permit = b.acquire(now).unwrap();
            assert!(b.record_failure(permit, now));
            let expected = if i < 3 {
                BreakerStatus::Closed
            } else {
                BreakerStatus::Open
            };
            assert_eq!(b.status(), expected, "after {i} failures");
        }
        assert_eq!(b.opened_at(), Some(now));
    }

    #[test]
    fn success_resets_failure_count() {
        let mut b = breaker(3, 30);
        let now = Instant::now();
        for _ in 0..2 {
            let p = b.acquire(now).unwrap();
            b.record_failure(p, now);
        }
        let p = b.acquire(now).unwrap();
        b.record_success(p);
        assert_eq!(b.consecutive_failures(), 0);

        let p = b.acquire(now).unwrap();
        b.record_failure(p, now);
        assert_eq!(b.status(), BreakerStatus::Closed);
    }

    #[test]
    fn open_denies_until_reset_timeout() {
        let mut b = breaker(1, 30);
        let t0 = Instant::now();
        let p = b.acquire(t0).unwrap();
        b.record_failure(p, t0);

        assert_eq!(
            b.acquire(t0 + Duration::from_secs(10)),
            Err(Denied::Open {
                remaining: Duration::from_secs(20)
            })
        );

        let trial = b.acquire(t0 + Duration::from_secs(30)).unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.status(), BreakerStatus::HalfOpen);
    }

    #[test]
    fn half_open_allows_exactly_one_trial() {
        let mut b = breaker(1, 5);
        let t0 = Instant::now();
        let p = b.acquire(t0).unwrap();
        b.record_failure(p, t0);

        let later = t0 + Duration::from_secs(5);
        assert!(b.acquire(later).is_ok());
        assert_eq!(b.acquire(later), Err(Denied::TrialInFlight));
    }

    #[test]
    fn trial_success_closes() {
        let mut b = breaker(1, 5);
        let t0 = Instant::now();
        let p = b.acquire(t0).unwrap();
        b.record_failure(p, t0);

        let trial = b.acquire(t0 + Duration::from_secs(5)).unwrap();
        assert!(b.record_success(trial));
        assert_eq!(b.status(), BreakerStatus::Closed);
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.opened_at(), None);
    }

    #[test]
    fn trial_failure_reopens_with_fresh_timestamp() {
        let mut b = breaker(1, 5);
        let t0 = Instant::now();
        let p = b.acquire(t0).unwrap();
        b.record_failure(p, t0);

        let t1 = t0 + Duration::from_secs(6);
        let trial = b.acquire(t1).unwrap();
        b.record_failure(trial, t1);
        assert_eq!(b.status(), BreakerStatus::Open);
        assert_eq!(b.opened_at(), Some(t1));
        assert!(matches!(
            b.acquire(t1 + Duration::from_secs(1)),
            Err(Denied::Open { .. })
        ));
    }

    #[test]
    fn stale_outcomes_are_ignored() {
        let mut b = breaker(1, 5);
        let t0 = Instant::now();
        let slow = b.acquire(t0).unwrap();
        let fast = b.acquire(t0).unwrap();
        b.record_failure(fast, t0);
        assert_eq!(b.status(), BreakerStatus::Open);

        // The slow call finishing late must not close the breaker.
        assert!(!b.record_success(slow));
        assert_eq!(b.status(), BreakerStatus::Open);
    }

    #[test]
    fn release_frees_trial_without_touching_counters() {
        let mut b = breaker(1, 5);
        let t0 = Instant::now();
        let p = b.acquire(t0).unwrap();
        b.record_failure(p, t0);

        let later = t0 + Duration::from_secs(5);
        let trial = b.acquire(later).unwrap();
        b.release(trial);
        assert_eq!(b.status(), BreakerStatus::HalfOpen);
        assert_eq!(b.consecutive_failures(), 1);
        assert!(b.acquire(later).is_ok());
    }

    #[test]
    fn status_round_trips_through_u8() {
        for s in [
            BreakerStatus::Closed,
            BreakerStatus::Open,
            BreakerStatus::HalfOpen,
        ] {
            assert_eq!(BreakerStatus::from_u8(s.as_u8()), s);
        }
    }
}
