//! The poll loop.
//!
//! Each cycle:
//! 1. capture the chat region and check for a genuine change
//! 2. admit the last line (structure, provenance, noise, duplicates, back-off)
//! 3. build the bounded conversation context
//! 4. generate a reply through the resilient client
//! 5. deliver it and record the reply time
//!
//! Any stage can end the cycle early; none of them ends the loop. Only the
//! stop flag does, checked at the top of each cycle and again right before a
//! reply is handed to delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::ConfigSource;
use crate::delivery::{DeliveryGateway, DeliveryOutcome};
use crate::llm::{GenerativeProvider, Reply, ResilienceConfig, ResilientAIClient};
use crate::pipeline::context::ContextBuilder;
use crate::pipeline::detector::ChangeDetector;
use crate::pipeline::types::Rejection;
use crate::pipeline::validator::{MessageValidator, ValidatorConfig};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::surface::{InputInjector, SurfaceReader};

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new on the surface (or the capture was debounced/failed).
    Unchanged,
    Rejected(Rejection),
    Delivered { reply: Reply, attempts: u32 },
    DeliveryFailed { reply: Reply, reason: String },
    /// The stop flag was set; nothing was sent.
    Stopped,
}

/// Owns the pipeline stages and runs them one message at a time.
pub struct Orchestrator {
    detector: ChangeDetector,
    validator: MessageValidator,
    builder: ContextBuilder,
    client: Arc<ResilientAIClient>,
    gateway: DeliveryGateway,
    check_interval: Duration,
    prime_on_start: bool,
    stop: Arc<AtomicBool>,
    status: Arc<StatusBoard>,
}

impl Orchestrator {
    pub fn from_config(
        config: &dyn ConfigSource,
        reader: Arc<dyn SurfaceReader>,
        injector: Arc<dyn InputInjector>,
        provider: Arc<dyn GenerativeProvider>,
    ) -> Self {
        let client = Arc::new(ResilientAIClient::new(
            provider,
            ResilienceConfig::from_source(config),
        ));
        Self::with_client(config, reader, injector, client)
    }

    /// Build around an existing client (shared caches, status readers).
    pub fn with_client(
        config: &dyn ConfigSource,
        reader: Arc<dyn SurfaceReader>,
        injector: Arc<dyn InputInjector>,
        client: Arc<ResilientAIClient>,
    ) -> Self {
        let detector =
            ChangeDetector::new(Arc::clone(&reader), config.chat_region(), config.debounce());
        let validator = MessageValidator::new(ValidatorConfig {
            persona_name: config.persona_name().to_string(),
            min_message_chars: config.min_message_chars(),
            dedup_capacity: config.dedup_capacity(),
            min_response_interval: config.min_response_interval(),
            burst_window: config.burst_window(),
            burst_threshold: config.burst_threshold(),
        });
        let builder = ContextBuilder::new(
            config.max_context_lines(),
            config.persona_name(),
            config.language_hint(),
        );
        let gateway = DeliveryGateway::new(
            reader,
            injector,
            config.message_box().clone(),
            config.delivery_attempts(),
            config.delivery_retry_pause(),
        );

        Self {
            detector,
            validator,
            builder,
            client,
            gateway,
            check_interval: config.check_interval(),
            prime_on_start: !config.reply_to_existing_on_start(),
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(StatusBoard::new()),
        }
    }

    pub fn client(&self) -> &Arc<ResilientAIClient> {
        &self.client
    }

    /// Request a stop; honoured at the next check.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot(&self.client)
    }

    /// Adopt the conversation currently on screen as already handled.
    pub async fn prime(&mut self) -> bool {
        self.detector.prime().await
    }

    /// Run a single cycle.
    pub async fn run_once(&mut self) -> CycleOutcome {
        if self.stopped() {
            return CycleOutcome::Stopped;
        }
        self.status.cycle();

        let Some(observation) = self.detector.observe().await else {
            return CycleOutcome::Unchanged;
        };

        let candidate = match self.validator.admit(&observation) {
            Ok(candidate) => candidate,
            Err(rejection) => {
                self.status.rejected();
                return CycleOutcome::Rejected(rejection);
            }
        };
        debug!(id = %candidate.id, text = %candidate.text, "Candidate admitted");

        let context = self.builder.build(&candidate, &candidate.history);
        let reply = self.client.generate_reply(&context).await;
        info!(id = %candidate.id, source = %reply.source, "Reply ready");

        if self.stopped() {
            info!(id = %candidate.id, "Stop requested, reply not sent");
            return CycleOutcome::Stopped;
        }

        match self.gateway.send(&reply.text).await {
            DeliveryOutcome::Delivered { attempts } => {
                self.validator.record_reply(Instant::now());
                self.status.delivered(&reply.text);
                CycleOutcome::Delivered { reply, attempts }
            }
            DeliveryOutcome::Failed { reason } => {
                self.status.delivery_failed();
                CycleOutcome::DeliveryFailed { reply, reason }
            }
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> OrchestratorHandle {
        let stop = Arc::clone(&self.stop);
        let status = Arc::clone(&self.status);
        let client = Arc::clone(&self.client);
        status.set_running(true);
        let join = tokio::spawn(self.run());
        OrchestratorHandle {
            join,
            stop,
            status,
            client,
        }
    }

    async fn run(mut self) {
        self.status.set_running(true);
        info!(
            interval = ?self.check_interval,
            prime = self.prime_on_start,
            "Orchestrator started"
        );

        if self.prime_on_start && self.prime().await {
            info!("Existing conversation marked as handled");
        }

        let mut tick = tokio::time::interval(self.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if self.stopped() {
                break;
            }

            let outcome = self.run_once().await;
            if outcome == CycleOutcome::Stopped {
                break;
            }
        }

        self.status.set_running(false);
        info!("Orchestrator stopped");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Control handle for a spawned [`Orchestrator`].
pub struct OrchestratorHandle {
    join: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    status: Arc<StatusBoard>,
    client: Arc<ResilientAIClient>,
}

impl OrchestratorHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot(&self.client)
    }

    /// Wait for the loop task to finish and return the final status.
    pub async fn join(self) -> Result<StatusSnapshot, JoinError> {
        self.join.await?;
        Ok(self.status.snapshot(&self.client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::llm::ReplySource;
    use crate::testing::{RecordingInjector, ScriptedProvider, ScriptedSurface};

    struct Rig {
        surface: Arc<ScriptedSurface>,
        injector: Arc<RecordingInjector>,
        provider: Arc<ScriptedProvider>,
        orchestrator: Orchestrator,
    }

    fn rig(text: &str, reply: &str) -> Rig {
        let config = BotConfig {
            debounce: Duration::ZERO,
            min_response_interval: Duration::ZERO,
            ..BotConfig::default()
        };
        let surface = Arc::new(ScriptedSurface::new(text));
        let injector = Arc::new(RecordingInjector::new());
        let provider = Arc::new(ScriptedProvider::replying(reply));
        let orchestrator =
            Orchestrator::from_config(&config, surface.clone(), injector.clone(), provider.clone());
        Rig {
            surface,
            injector,
            provider,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_delivers_reply() {
        let mut rig = rig("Mom: are you free tonight?", "Yes! What time?");
        let outcome = rig.orchestrator.run_once().await;

        let CycleOutcome::Delivered { reply, attempts } = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };
        assert_eq!(reply.text, "Yes! What time?");
        assert_eq!(reply.source, ReplySource::Provider);
        assert_eq!(attempts, 1);
        assert_eq!(rig.injector.submitted(), vec!["Yes! What time?"]);
        assert_eq!(rig.orchestrator.status().replies_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_surface_does_no_work() {
        let mut rig = rig("Mom: are you free tonight?", "Yes!");
        rig.orchestrator.run_once().await;
        assert_eq!(rig.orchestrator.run_once().await, CycleOutcome::Unchanged);
        assert_eq!(rig.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn own_reply_on_screen_is_not_answered() {
        let mut rig = rig("Mom: are you free tonight?", "Yes! What time?");
        rig.orchestrator.run_once().await;

        rig.surface.push_line("Nitesh: Yes! What time?");
        assert_eq!(
            rig.orchestrator.run_once().await,
            CycleOutcome::Rejected(Rejection::SelfAuthored)
        );
        assert_eq!(rig.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_cycle_sends_nothing() {
        let mut rig = rig("Mom: hello?", "hi");
        rig.orchestrator.stop();
        assert_eq!(rig.orchestrator.run_once().await, CycleOutcome::Stopped);
        assert_eq!(rig.surface.captures(), 0);
        assert!(rig.injector.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_is_reported() {
        let mut rig = rig("Mom: hello?", "hi");
        rig.surface.miss_locates(10);
        let outcome = rig.orchestrator.run_once().await;
        assert!(matches!(outcome, CycleOutcome::DeliveryFailed { .. }));
        assert_eq!(rig.orchestrator.status().delivery_failures, 1);

        // A re-render of the same chat is not a new message.
        rig.surface.set_text("Mom: hello?\n");
        assert_eq!(rig.orchestrator.run_once().await, CycleOutcome::Unchanged);
    }
}
