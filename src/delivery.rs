//! Reply delivery: locate the input box, focus it, type, submit.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SurfaceError;
use crate::surface::{DeliveryTarget, InputInjector, Location, SurfaceReader};

/// Result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DeliveryOutcome {
    /// Submitted; `attempts` counts the locate attempts it took.
    Delivered { attempts: u32 },
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Sends replies through the surface collaborators.
pub struct DeliveryGateway {
    reader: Arc<dyn SurfaceReader>,
    injector: Arc<dyn InputInjector>,
    target: DeliveryTarget,
    attempts: u32,
    retry_pause: Duration,
}

impl DeliveryGateway {
    pub fn new(
        reader: Arc<dyn SurfaceReader>,
        injector: Arc<dyn InputInjector>,
        target: DeliveryTarget,
        attempts: u32,
        retry_pause: Duration,
    ) -> Self {
        Self {
            reader,
            injector,
            target,
            attempts: attempts.max(1),
            retry_pause,
        }
    }

    /// Deliver `text`. Failures are logged and reported, never raised.
    ///
    /// Locating and focusing the target is retried; once typing has begun a
    /// failure ends the attempt, so a reply is never typed twice.
    pub async fn send(&self, text: &str) -> DeliveryOutcome {
        if text.trim().is_empty() {
            return self.failed("refusing to send an empty reply".to_string());
        }

        let mut last_error = String::from("target never located");
        for attempt in 1..=self.attempts {
            match self.prepare().await {
                Ok(location) => {
                    debug!(attempt, x = location.x, y = location.y, "Delivery target ready");
                    return match self.inject(text).await {
                        Ok(()) => {
                            info!(attempt, target_box = %self.target, "Reply delivered");
                            DeliveryOutcome::Delivered { attempts: attempt }
                        }
                        Err(e) => self.failed(format!("injection failed: {e}")),
                    };
                }
                Err(reason) => {
                    debug!(attempt, reason = %reason, "Delivery target not ready");
                    last_error = reason;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_pause).await;
            }
        }

        self.failed(format!(
            "{last_error} after {} attempt(s)",
            self.attempts
        ))
    }

    async fn prepare(&self) -> Result<Location, String> {
        let location = self
            .reader
            .locate_template(&self.target)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{} not on screen", self.target))?;
        self.injector
            .focus(location)
            .await
            .map_err(|e| e.to_string())?;
        Ok(location)
    }

    async fn inject(&self, text: &str) -> Result<(), SurfaceError> {
        self.injector.type_text(text).await?;
        self.injector.submit().await
    }

    fn failed(&self, reason: String) -> DeliveryOutcome {
        warn!(target_box = %self.target, reason = %reason, "Delivery failed");
        DeliveryOutcome::Failed { reason }
    }
}
