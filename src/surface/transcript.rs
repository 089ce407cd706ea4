//! Transcript-file surface and console injector.
//!
//! Stand-ins for a real UI-automation backend: the "screen" is a chat
//! transcript on disk (one message per line, appended to by whatever bridges
//! the messaging app), and replies are printed to stdout. When the injector
//! is given the transcript path it also appends `"<persona>: <reply>"`, so
//! the next capture sees our own message just as a real chat window would.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::SurfaceError;
use crate::surface::{DeliveryTarget, InputInjector, Location, RegionBounds, SurfaceReader};

/// Reads the conversation from a transcript file.
pub struct TranscriptSurface {
    path: PathBuf,
}

impl TranscriptSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SurfaceReader for TranscriptSurface {
    async fn capture_region(&self, _bounds: RegionBounds) -> Result<String, SurfaceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            // Nothing has been written yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SurfaceError::CaptureFailed(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn locate_template(
        &self,
        target: &DeliveryTarget,
    ) -> Result<Option<Location>, SurfaceError> {
        // A transcript has no geometry; every target is "visible".
        Ok(Some(match target {
            DeliveryTarget::Coordinate { x, y } => Location { x: *x, y: *y },
            DeliveryTarget::Template(_) => Location { x: 0, y: 0 },
        }))
    }
}

/// Prints replies to stdout, optionally echoing them into the transcript.
pub struct ConsoleInjector {
    persona: String,
    echo_to: Option<PathBuf>,
    pending: Mutex<String>,
}

impl ConsoleInjector {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            echo_to: None,
            pending: Mutex::new(String::new()),
        }
    }

    /// Append submitted replies to `path` as `"<persona>: <reply>"`.
    pub fn with_transcript_echo(mut self, path: impl Into<PathBuf>) -> Self {
        self.echo_to = Some(path.into());
        self
    }
}

#[async_trait]
impl InputInjector for ConsoleInjector {
    async fn focus(&self, location: Location) -> Result<(), SurfaceError> {
        debug!(x = location.x, y = location.y, "Focusing input");
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), SurfaceError> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(text);
        Ok(())
    }

    async fn submit(&self) -> Result<(), SurfaceError> {
        let text = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        if text.is_empty() {
            return Err(SurfaceError::InjectionFailed(
                "nothing typed before submit".to_string(),
            ));
        }

        println!("{}: {}", self.persona, text);

        if let Some(path) = &self.echo_to {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            let line = format!("{}: {}\n", self.persona, text.replace('\n', " "));
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
