//! Inbound message pipeline.
//!
//! Every poll flows through:
//! 1. `ChangeDetector::observe()`: capture and fingerprint the chat region
//! 2. `MessageValidator::admit()`: heuristic admission, no LLM involved
//! 3. `ContextBuilder::build()`: bounded, normalized conversation
//!
//! A stage that declines simply ends the cycle.

pub mod context;
pub mod detector;
pub mod types;
pub mod validator;

pub use context::ContextBuilder;
pub use detector::ChangeDetector;
pub use types::{CandidateMessage, ConversationContext, LanguageHint, RawObservation, Rejection, Sender};
pub use validator::{MessageValidator, ValidatorConfig};
