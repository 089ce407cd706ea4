//! Live engine status.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::{BreakerStatus, ResilientAIClient, StatsSnapshot};

/// Counters updated by the loop task and read from anywhere.
#[derive(Debug, Default)]
pub struct StatusBoard {
    running: AtomicBool,
    cycles: AtomicU64,
    replies_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    rejections: AtomicU64,
    last_reply: Mutex<Option<(String, DateTime<Utc>)>>,
}

/// Serializable view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub cycles: u64,
    pub replies_delivered: u64,
    pub delivery_failures: u64,
    pub rejections: u64,
    pub last_reply: Option<String>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub breaker: BreakerStatus,
    pub resilience: StatsSnapshot,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self, text: &str) {
        self.replies_delivered.fetch_add(1, Ordering::Relaxed);
        *self.last_reply.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((text.to_string(), Utc::now()));
    }

    pub(crate) fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, client: &ResilientAIClient) -> StatusSnapshot {
        let last = self
            .last_reply
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let (last_reply, last_reply_at) = match last {
            Some((text, at)) => (Some(text), Some(at)),
            None => (None, None),
        };
        StatusSnapshot {
            running: self.is_running(),
            cycles: self.cycles.load(Ordering::Relaxed),
            replies_delivered: self.replies_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            last_reply,
            last_reply_at,
            breaker: client.breaker_status(),
            resilience: client.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::ResilienceConfig;
    use crate::testing::ScriptedProvider;

    #[test]
    fn snapshot_reflects_counters() {
        let client = ResilientAIClient::new(
            Arc::new(ScriptedProvider::replying("ok")),
            ResilienceConfig::default(),
        );
        let board = StatusBoard::new();
        board.set_running(true);
        board.cycle();
        board.cycle();
        board.rejected();
        board.delivered("Yes! What time?");
        board.delivery_failed();

        let snap = board.snapshot(&client);
        assert!(snap.running);
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.rejections, 1);
        assert_eq!(snap.replies_delivered, 1);
        assert_eq!(snap.delivery_failures, 1);
        assert_eq!(snap.last_reply.as_deref(), Some("Yes! What time?"));
        assert!(snap.last_reply_at.is_some());
        assert_eq!(snap.breaker, BreakerStatus::Closed);
    }

    #[test]
    fn snapshot_serializes() {
        let client = ResilientAIClient::new(
            Arc::new(ScriptedProvider::replying("ok")),
            ResilienceConfig::default(),
        );
        let json = serde_json::to_value(StatusBoard::new().snapshot(&client)).unwrap();
        assert_eq!(json["breaker"], "closed");
        assert_eq!(json["resilience"]["provider_calls"], 0);
    }
}
