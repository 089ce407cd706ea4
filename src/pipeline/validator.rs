//! Admission control for observed messages.
//!
//! Decides, without any LLM involvement, whether the last line of a capture
//! is something we should answer:
//! - Not conversation-shaped → Structural
//! - Written by our persona → SelfAuthored
//! - Platform banners (joins, encryption, deletions) → SystemNotice
//! - Too short / emoji only → Noise
//! - Seen recently → Duplicate
//! - Replying too soon or the chat is racing → Backoff
//!
//! Rejections are not errors; the pipeline just stops for this cycle.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::types::{
    CandidateMessage, RawObservation, Rejection, Sender, fingerprint, normalize_text,
};

/// A contact as the platform prints it in notices.
const NAME: &str = r"(?:\+[\d ]{7,20}\d|\p{Lu}[\w'.\-]*(?: \p{Lu}[\w'.\-]*){0,2})";

/// Tunables for the validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub persona_name: String,
    pub min_message_chars: usize,
    pub dedup_capacity: usize,
    pub min_response_interval: Duration,
    pub burst_window: Duration,
    pub burst_threshold: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            persona_name: "Nitesh".to_string(),
            min_message_chars: 2,
            dedup_capacity: 128,
            min_response_interval: Duration::from_secs(8),
            burst_window: Duration::from_secs(60),
            burst_threshold: 6,
        }
    }
}

/// Line-shape heuristics shared by the validator and the context builder.
pub(crate) struct LineShape {
    timestamp: Regex,
    speaker: Regex,
    terminal_punctuation: Regex,
}

impl LineShape {
    pub(crate) fn new() -> Self {
        Self {
            // "[10:32, 12/03/2024] ", "[10:32 PM] ", "10:32 - ", "12/03/24, 10:32 - "
            timestamp: Regex::new(
                r"^\s*(?:\[[^\]]{1,40}\]\s*|(?:\d{1,4}[/.\-]\d{1,2}[/.\-]\d{1,4},?\s+)?\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AaPp][Mm])?\s*(?:-|–)\s+)",
            )
            .unwrap(),
            // "Name: " with a short speaker label.
            speaker: Regex::new(r"^([^:\n]{1,40}?):\s").unwrap(),
            terminal_punctuation: Regex::new(r"[.!?…。]\s*$").unwrap(),
        }
    }

    /// Strip a leading timestamp, if any.
    pub(crate) fn strip_timestamp<'a>(&self, line: &'a str) -> &'a str {
        match self.timestamp.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        }
    }

    fn has_timestamp(&self, line: &str) -> bool {
        self.timestamp.is_match(line)
    }

    /// Speaker label and message body, if the line carries a marker.
    fn split_speaker<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.speaker.captures(line)?;
        let label = caps.get(1)?;
        let whole = caps.get(0)?;
        Some((label.as_str().trim(), line[whole.end()..].trim()))
    }

    fn is_message_like(line: &str) -> bool {
        line.chars().any(char::is_alphanumeric)
    }
}

/// Validates and deduplicates observed messages.
pub struct MessageValidator {
    config: ValidatorConfig,
    shape: LineShape,
    self_markers: Vec<Regex>,
    system_notices: Vec<Regex>,
    recent_keys: HashSet<String>,
    recent_order: VecDeque<String>,
    /// Arrival times of admissible messages inside the burst window.
    arrivals: VecDeque<Instant>,
    last_reply: Option<Instant>,
}

impl MessageValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let self_markers = vec![
            Regex::new(r"(?i)^(you|me)\s*:").unwrap(),
            Regex::new(r"(?i)^you sent\b").unwrap(),
        ];

        // Platform phrasing only: the actor is "You" or a contact, and nothing
        // follows the fixed wording.
        let system_notices = [
            r"(?i)^messages and calls are end-to-end encrypted\b".to_string(),
            r"(?i)^(this message was deleted|you deleted this message)\.?$".to_string(),
            format!(r"^(?:You|{NAME}) (added|removed) {NAME}(?:(?:, | and ){NAME})*$"),
            format!(r"^(?:You|{NAME}) (left|joined)$"),
            format!(r"^(?:You|{NAME}) joined using this group's invite link$"),
            format!(
                r"^(?:You|{NAME}) changed (the subject|this group's (icon|description|settings))\b"
            ),
            format!(r#"^(?:You|{NAME}) created (the )?group\b"#),
            format!(r"^(?:You|{NAME}) turned (on|off) disappearing messages\b"),
            r"(?i)^missed (voice|video) call\b".to_string(),
            format!(r"^Your security code with {NAME} changed\b"),
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();

        Self {
            config,
            shape: LineShape::new(),
            self_markers,
            system_notices,
            recent_keys: HashSet::new(),
            recent_order: VecDeque::new(),
            arrivals: VecDeque::new(),
            last_reply: None,
        }
    }

    /// Decide whether `raw` carries a message worth answering.
    pub fn admit(&mut self, raw: &RawObservation) -> Result<CandidateMessage, Rejection> {
        self.admit_at(raw, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(
        &mut self,
        raw: &RawObservation,
        now: Instant,
    ) -> Result<CandidateMessage, Rejection> {
        let result = self.evaluate(raw, now);
        if let Err(reason) = &result {
            debug!(reason = reason.label(), "Observation rejected");
        }
        result
    }

    /// Start the min-response-interval timer after a reply went out.
    pub fn record_reply(&mut self, now: Instant) {
        self.last_reply = Some(now);
    }

    /// Classify a single line by author.
    pub fn infer_sender(&self, line: &str) -> Sender {
        let line = self.shape.strip_timestamp(line.trim());
        if self.is_self_authored(line) {
            Sender::Me
        } else if self.is_system_notice(line) {
            Sender::System
        } else if self.shape.split_speaker(line).is_some() {
            Sender::Other
        } else {
            Sender::Unknown
        }
    }

    /// Number of dedup keys currently remembered.
    pub fn remembered(&self) -> usize {
        self.recent_order.len()
    }

    fn evaluate(&mut self, raw: &RawObservation, now: Instant) -> Result<CandidateMessage, Rejection> {
        let lines = raw.lines();
        let last = lines.last().ok_or(Rejection::Structural)?.clone();
        let last_body_line = self.shape.strip_timestamp(&last).trim().to_string();

        // 1. structure
        if !self.is_structurally_plausible(&lines, &last_body_line) {
            return Err(Rejection::Structural);
        }

        // 2. provenance
        if self.is_self_authored(&last_body_line) {
            return Err(Rejection::SelfAuthored);
        }

        // 3. platform notices
        if self.is_system_notice(&last_body_line) {
            return Err(Rejection::SystemNotice);
        }

        // 4. noise
        let body = self
            .shape
            .split_speaker(&last_body_line)
            .map(|(_, body)| body)
            .unwrap_or(&last_body_line);
        if body.chars().count() < self.config.min_message_chars
            || !body.chars().any(char::is_alphanumeric)
        {
            return Err(Rejection::Noise);
        }

        // 5. duplicates
        let dedup_key = fingerprint(&normalize_text(&last));
        if self.recent_keys.contains(&dedup_key) {
            return Err(Rejection::Duplicate);
        }

        // 6. back-off
        self.note_arrival(now);
        if self.backing_off(now) {
            return Err(Rejection::Backoff);
        }

        self.remember(dedup_key.clone());

        Ok(CandidateMessage {
            id: Uuid::new_v4(),
            text: last,
            inferred_sender: Sender::Other,
            dedup_key,
            history: lines,
        })
    }

    fn is_structurally_plausible(&self, lines: &[String], last_body_line: &str) -> bool {
        let message_like = lines
            .iter()
            .filter(|l| LineShape::is_message_like(l))
            .count();
        if message_like == 0 {
            return false;
        }

        let any_marked = lines.iter().any(|l| {
            let stripped = self.shape.strip_timestamp(l);
            self.shape.has_timestamp(l)
                || self.shape.split_speaker(stripped).is_some()
                || self.shape.terminal_punctuation.is_match(stripped)
        });
        if !any_marked {
            return false;
        }

        message_like >= 2 || self.shape.split_speaker(last_body_line).is_some()
    }

    fn is_self_authored(&self, line: &str) -> bool {
        if let Some((speaker, _)) = self.shape.split_speaker(line) {
            if speaker.eq_ignore_ascii_case(self.config.persona_name.trim()) {
                return true;
            }
        }
        self.self_markers.iter().any(|r| r.is_match(line))
    }

    fn is_system_notice(&self, line: &str) -> bool {
        // Notices have no speaker label; a person typing "I left" is fine.
        if self.shape.split_speaker(line).is_some() {
            return false;
        }
        self.system_notices.iter().any(|r| r.is_match(line))
    }

    fn note_arrival(&mut self, now: Instant) {
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) >= self.config.burst_window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
        self.arrivals.push_back(now);
    }

    fn backing_off(&self, now: Instant) -> bool {
        if let Some(last) = self.last_reply {
            if now.saturating_duration_since(last) < self.config.min_response_interval {
                debug!("Within minimum response interval");
                return true;
            }
        }
        if self.arrivals.len() > self.config.burst_threshold {
            debug!(
                arrivals = self.arrivals.len(),
                threshold = self.config.burst_threshold,
                "Conversation moving too fast"
            );
            return true;
        }
        false
    }

    fn remember(&mut self, key: String) {
        if self.recent_keys.insert(key.clone()) {
            self.recent_order.push_back(key);
        }
        while self.recent_order.len() > self.config.dedup_capacity {
            if let Some(evicted) = self.recent_order.pop_front() {
                self.recent_keys.remove(&evicted);
            }
        }
    }
}
