//! Conversation context assembly.
//!
//! Turns raw surface lines into the bounded, normalized sequence the
//! provider sees. Pure: the same candidate and history always produce the
//! same context, which keeps response-cache keys stable.

use crate::pipeline::types::{CandidateMessage, ConversationContext, LanguageHint};
use crate::pipeline::validator::LineShape;

/// Builds [`ConversationContext`]s.
pub struct ContextBuilder {
    max_lines: usize,
    persona: String,
    language_hint: LanguageHint,
    shape: LineShape,
}

impl ContextBuilder {
    pub fn new(max_lines: usize, persona: impl Into<String>, language_hint: LanguageHint) -> Self {
        Self {
            max_lines: max_lines.max(1),
            persona: persona.into(),
            language_hint,
            shape: LineShape::new(),
        }
    }

    /// Build the context for `candidate` from the raw `history` lines
    /// (oldest first).
    pub fn build(&self, candidate: &CandidateMessage, history: &[String]) -> ConversationContext {
        let mut lines: Vec<String> = history
            .iter()
            .map(|line| self.clean(line))
            .filter(|line| !line.is_empty())
            .collect();

        let last = self.clean(&candidate.text);
        if !last.is_empty() && lines.last() != Some(&last) {
            lines.push(last);
        }

        if lines.len() > self.max_lines {
            lines.drain(..lines.len() - self.max_lines);
        }

        ConversationContext {
            lines,
            language_hint: self.language_hint,
            persona: self.persona.clone(),
        }
    }

    fn clean(&self, line: &str) -> String {
        let without_controls: String = line
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        self.shape
            .strip_timestamp(without_controls.trim())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
