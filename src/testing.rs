//! Scripted collaborators for tests and dry runs.
//!
//! Each double records what it was asked to do so tests can assert on it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, SurfaceError};
use crate::llm::GenerativeProvider;
use crate::surface::{DeliveryTarget, InputInjector, Location, RegionBounds, SurfaceReader};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Surface ─────────────────────────────────────────────────────────

/// A surface whose visible text is set by the test.
pub struct ScriptedSurface {
    text: Mutex<String>,
    captures: AtomicUsize,
    fail_captures: AtomicBool,
    locate_misses: AtomicUsize,
    locate_calls: AtomicUsize,
}

impl ScriptedSurface {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
            captures: AtomicUsize::new(0),
            fail_captures: AtomicBool::new(false),
            locate_misses: AtomicUsize::new(0),
            locate_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *lock(&self.text) = text.into();
    }

    /// Append a line, as a new chat message would.
    pub fn push_line(&self, line: &str) {
        let mut text = lock(&self.text);
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(line);
    }

    pub fn text(&self) -> String {
        lock(&self.text).clone()
    }

    /// Number of completed capture attempts.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` target lookups report "not on screen".
    pub fn miss_locates(&self, n: usize) {
        self.locate_misses.store(n, Ordering::SeqCst);
    }

    pub fn locate_calls(&self) -> usize {
        self.locate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SurfaceReader for ScriptedSurface {
    async fn capture_region(&self, _bounds: RegionBounds) -> Result<String, SurfaceError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(SurfaceError::CaptureFailed("scripted failure".to_string()));
        }
        Ok(self.text())
    }

    async fn locate_template(
        &self,
        target: &DeliveryTarget,
    ) -> Result<Option<Location>, SurfaceError> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        let missed = self
            .locate_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        Ok(Some(match target {
            DeliveryTarget::Coordinate { x, y } => Location { x: *x, y: *y },
            DeliveryTarget::Template(_) => Location { x: 1, y: 1 },
        }))
    }
}

// ── Injector ────────────────────────────────────────────────────────

/// One call made on a [`RecordingInjector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectorEvent {
    Focus(Location),
    Type(String),
    Submit,
}

/// Records every injection call.
#[derive(Default)]
pub struct RecordingInjector {
    events: Mutex<Vec<InjectorEvent>>,
    fail_submit: AtomicBool,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InjectorEvent> {
        lock(&self.events).clone()
    }

    /// Texts that were typed and then submitted.
    pub fn submitted(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut typed: Option<String> = None;
        for event in lock(&self.events).iter() {
            match event {
                InjectorEvent::Focus(_) => typed = None,
                InjectorEvent::Type(text) => typed.get_or_insert_with(String::new).push_str(text),
                InjectorEvent::Submit => {
                    if let Some(text) = typed.take() {
                        out.push(text);
                    }
                }
            }
        }
        out
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InputInjector for RecordingInjector {
    async fn focus(&self, location: Location) -> Result<(), SurfaceError> {
        lock(&self.events).push(InjectorEvent::Focus(location));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), SurfaceError> {
        lock(&self.events).push(InjectorEvent::Type(text.to_string()));
        Ok(())
    }

    async fn submit(&self) -> Result<(), SurfaceError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(SurfaceError::InjectionFailed("scripted failure".to_string()));
        }
        lock(&self.events).push(InjectorEvent::Submit);
        Ok(())
    }
}

// ── Provider ────────────────────────────────────────────────────────

/// What a [`ScriptedProvider`] does on a call.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Reply(String),
    Fail(ProviderError),
    /// Never returns.
    Hang,
    /// Reply after a delay.
    Delayed(Duration, String),
}

/// Provider that plays back queued outcomes, then a default one.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<ScriptedOutcome>>,
    default: Mutex<ScriptedOutcome>,
    calls: AtomicUsize,
    last_request: Mutex<Option<(String, Vec<String>)>>,
}

impl ScriptedProvider {
    pub fn new(default: ScriptedOutcome) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(ScriptedOutcome::Reply(text.into()))
    }

    /// Queue an outcome for the next call that has none queued before it.
    pub fn push(&self, outcome: ScriptedOutcome) {
        lock(&self.queue).push_back(outcome);
    }

    pub fn set_default(&self, outcome: ScriptedOutcome) {
        *lock(&self.default) = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// System prompt and context lines of the most recent call.
    pub fn last_request(&self) -> Option<(String, Vec<String>)> {
        lock(&self.last_request).clone()
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        context_lines: &[String],
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some((system_prompt.to_string(), context_lines.to_vec()));

        let queued = lock(&self.queue).pop_front();
        let outcome = match queued {
            Some(outcome) => outcome,
            None => lock(&self.default).clone(),
        };

        match outcome {
            ScriptedOutcome::Reply(text) => Ok(text),
            ScriptedOutcome::Fail(err) => Err(err),
            ScriptedOutcome::Hang => std::future::pending().await,
            ScriptedOutcome::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }
}
