//! Shared types for the message pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ── Observation ─────────────────────────────────────────────────────

/// One capture of the monitored surface that differs from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    /// Text as captured, untouched.
    pub captured_text: String,
    /// Wall-clock time of the capture.
    pub capture_time: DateTime<Utc>,
    /// SHA-256 (hex) of the normalized text.
    pub surface_fingerprint: String,
}

impl RawObservation {
    pub fn new(captured_text: impl Into<String>) -> Self {
        let captured_text = captured_text.into();
        let surface_fingerprint = fingerprint(&normalize_text(&captured_text));
        Self {
            captured_text,
            capture_time: Utc::now(),
            surface_fingerprint,
        }
    }

    /// Non-empty, trimmed lines of the capture in display order.
    pub fn lines(&self) -> Vec<String> {
        self.captured_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

// ── Candidate ───────────────────────────────────────────────────────

/// Who wrote a line, as far as the heuristics can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// Our own persona.
    Me,
    Other,
    System,
    Unknown,
}

/// An inbound message that passed validation and deserves a reply.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    /// Correlation id for logs.
    pub id: Uuid,
    /// The last line of the capture (the message being answered).
    pub text: String,
    pub inferred_sender: Sender,
    /// Stable under re-observation of identical text.
    pub dedup_key: String,
    /// Raw lines of the observation the candidate came from.
    pub history: Vec<String>,
}

/// Why the validator declined to answer. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Doesn't look like a conversation.
    Structural,
    /// Written by our own persona.
    SelfAuthored,
    /// Platform notice (joins, encryption banners, deletions...).
    SystemNotice,
    /// Too short or nothing but emoji/punctuation.
    Noise,
    /// Already seen recently.
    Duplicate,
    /// Replying too soon or the chat is moving too fast.
    Backoff,
}

impl Rejection {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::SelfAuthored => "self_authored",
            Self::SystemNotice => "system_notice",
            Self::Noise => "noise",
            Self::Duplicate => "duplicate",
            Self::Backoff => "backoff",
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Language mix the persona replies in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LanguageHint {
    HindiEnglish,
    English,
    Hindi,
    NepaliHindiEnglish,
}

impl LanguageHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HindiEnglish => "Hindi-English",
            Self::English => "English",
            Self::Hindi => "Hindi",
            Self::NepaliHindiEnglish => "Nepali-Hindi-English",
        }
    }
}

impl fmt::Display for LanguageHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "hindi-english" | "hinglish" => Ok(Self::HindiEnglish),
            "english" | "en" => Ok(Self::English),
            "hindi" | "hi" => Ok(Self::Hindi),
            "nepali-hindi-english" => Ok(Self::NepaliHindiEnglish),
            other => Err(format!("unknown language mix '{other}'")),
        }
    }
}

/// Bounded, normalized conversation handed to the provider.
///
/// Built fresh for each candidate and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConversationContext {
    /// Most recent last.
    pub lines: Vec<String>,
    pub language_hint: LanguageHint,
    pub persona: String,
}

impl ConversationContext {
    /// The line being replied to.
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

// ── Hashing ─────────────────────────────────────────────────────────

/// Collapse whitespace runs and drop blank lines.
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of `text`.
pub fn fingerprint(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
