//! Change detection on the monitored surface.
//!
//! Each poll captures the chat region and compares a fingerprint of the
//! normalized text against the last genuine change. Captures closer together
//! than the debounce window are skipped outright, which absorbs partial
//! repaints and cursor blinks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::pipeline::types::RawObservation;
use crate::surface::{RegionBounds, SurfaceReader};

/// Detects meaningful changes of the monitored surface.
pub struct ChangeDetector {
    reader: Arc<dyn SurfaceReader>,
    bounds: RegionBounds,
    debounce: Duration,
    last_fingerprint: Option<String>,
    last_capture: Option<Instant>,
}

impl ChangeDetector {
    pub fn new(reader: Arc<dyn SurfaceReader>, bounds: RegionBounds, debounce: Duration) -> Self {
        Self {
            reader,
            bounds,
            debounce,
            last_fingerprint: None,
            last_capture: None,
        }
    }

    /// Capture the surface and return it if it changed since the last
    /// genuine change.
    pub async fn observe(&mut self) -> Option<RawObservation> {
        let now = Instant::now();
        if self.debounced(now) {
            debug!("Capture skipped (debounce)");
            return None;
        }
        self.last_capture = Some(now);

        let text = match self.reader.capture_region(self.bounds).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Surface capture failed");
                return None;
            }
        };
        self.evaluate(&text)
    }

    /// Capture once and adopt the result as the baseline without reporting
    /// it. Returns whether a baseline was stored.
    pub async fn prime(&mut self) -> bool {
        match self.reader.capture_region(self.bounds).await {
            Ok(text) if !text.trim().is_empty() => {
                let obs = RawObservation::new(text);
                debug!(fingerprint = %obs.surface_fingerprint, "Detector baseline stored");
                self.last_fingerprint = Some(obs.surface_fingerprint);
                self.last_capture = Some(Instant::now());
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Baseline capture failed");
                false
            }
        }
    }

    /// Compare captured text with the stored fingerprint.
    ///
    /// The fingerprint is only replaced when a change is reported; empty
    /// captures never touch it.
    pub fn evaluate(&mut self, text: &str) -> Option<RawObservation> {
        if text.trim().is_empty() {
            debug!("Empty capture ignored");
            return None;
        }

        let obs = RawObservation::new(text);
        if self.last_fingerprint.as_deref() == Some(obs.surface_fingerprint.as_str()) {
            debug!("Surface unchanged");
            return None;
        }

        self.last_fingerprint = Some(obs.surface_fingerprint.clone());
        Some(obs)
    }

    /// Fingerprint of the last reported change.
    pub fn last_fingerprint(&self) -> Option<&str> {
        self.last_fingerprint.as_deref()
    }

    fn debounced(&self, now: Instant) -> bool {
        self.last_capture
            .is_some_and(|last| now.saturating_duration_since(last) < self.debounce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSurface;

    const BOUNDS: RegionBounds = RegionBounds {
        x: 0,
        y: 0,
        width: 100,
        height: 100,
    };

    fn detector(surface: &Arc<ScriptedSurface>, debounce: Duration) -> ChangeDetector {
        ChangeDetector::new(surface.clone(), BOUNDS, debounce)
    }

    #[tokio::test(start_paused = true)]
    async fn first_capture_is_a_change() {
        let surface = Arc::new(ScriptedSurface::new("Mom: hi"));
        let mut det = detector(&surface, Duration::ZERO);
        let obs = det.observe().await.expect("first capture reports");
        assert_eq!(obs.captured_text, "Mom: hi");
    }

    #[tokio::test(start_paused = true)]
    async fn identical_capture_is_not_a_change() {
        let surface = Arc::new(ScriptedSurface::new("Mom: hi"));
        let mut det = detector(&surface, Duration::ZERO);
        assert!(det.observe().await.is_some());
        assert!(det.observe().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_skips_capture_entirely() {
        let surface = Arc::new(ScriptedSurface::new("Mom: hi"));
        let mut det = detector(&surface, Duration::from_secs(2));
        assert!(det.observe().await.is_some());

        surface.set_text("Mom: hi\nMom: hello?");
        assert!(det.observe().await.is_none());
        assert_eq!(surface.captures(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(det.observe().await.is_some());
        assert_eq!(surface.captures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spurious_empty_capture_keeps_state() {
        let surface = Arc::new(ScriptedSurface::new("Mom: hi"));
        let mut det = detector(&surface, Duration::ZERO);
        assert!(det.observe().await.is_some());
        let before = det.last_fingerprint().map(String::from);

        surface.set_text("   \n");
        assert!(det.observe().await.is_none());
        assert_eq!(det.last_fingerprint().map(String::from), before);

        // The original text coming back is still "unchanged".
        surface.set_text("Mom: hi");
        assert!(det.observe().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_is_a_no_op() {
        let surface = Arc::new(ScriptedSurface::new("Mom: hi"));
        surface.fail_captures(true);
        let mut det = detector(&surface, Duration::ZERO);
        assert!(det.observe().await.is_none());
        assert!(det.last_fingerprint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn prime_sets_baseline_without_reporting() {
        let surface = Arc::new(ScriptedSurface::new("Mom: are you up?"));
        let mut det = detector(&surface, Duration::ZERO);
        assert!(det.prime().await);
        assert!(det.observe().await.is_none());

        surface.set_text("Mom: are you up?\nMom: call me");
        assert!(det.observe().await.is_some());
    }
}
