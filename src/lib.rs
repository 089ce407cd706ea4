//! autoreply: resilient chat auto-reply engine.

pub mod config;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod status;
pub mod surface;
pub mod testing;
