//! End-to-end runs of the orchestrator against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use autoreply::config::BotConfig;
use autoreply::error::ProviderError;
use autoreply::llm::{BreakerStatus, FallbackReason, ReplySource};
use autoreply::orchestrator::{CycleOutcome, Orchestrator};
use autoreply::pipeline::Rejection;
use autoreply::surface::{ConsoleInjector, TranscriptSurface};
use autoreply::testing::{RecordingInjector, ScriptedOutcome, ScriptedProvider, ScriptedSurface};

struct Harness {
    surface: Arc<ScriptedSurface>,
    injector: Arc<RecordingInjector>,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    fn new(text: &str, provider: ScriptedProvider) -> Self {
        Self {
            surface: Arc::new(ScriptedSurface::new(text)),
            injector: Arc::new(RecordingInjector::new()),
            provider: Arc::new(provider),
        }
    }

    fn orchestrator(&self, config: &BotConfig) -> Orchestrator {
        Orchestrator::from_config(
            config,
            self.surface.clone(),
            self.injector.clone(),
            self.provider.clone(),
        )
    }
}

fn quick_config() -> BotConfig {
    BotConfig {
        debounce: Duration::ZERO,
        min_response_interval: Duration::ZERO,
        ..BotConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_question_gets_a_provider_reply() {
    let h = Harness::new(
        "Mom: are you free tonight?",
        ScriptedProvider::replying("Yes! What time?"),
    );
    let mut orchestrator = h.orchestrator(&quick_config());

    let outcome = orchestrator.run_once().await;
    let CycleOutcome::Delivered { reply, .. } = outcome else {
        panic!("expected a delivered reply, got {outcome:?}");
    };
    assert_eq!(reply.text, "Yes! What time?");
    assert_eq!(reply.source, ReplySource::Provider);
    assert_eq!(h.injector.submitted(), vec!["Yes! What time?"]);

    let (_, lines) = h.provider.last_request().expect("provider called");
    assert_eq!(lines, vec!["Mom: are you free tonight?"]);
    assert_eq!(orchestrator.client().stats().provider_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_open_the_breaker() {
    let h = Harness::new("", ScriptedProvider::new(ScriptedOutcome::Hang));
    let mut orchestrator = h.orchestrator(&quick_config());

    for i in 0..5 {
        h.surface.push_line(&format!("Mom: are you there? ({i})"));
        let outcome = orchestrator.run_once().await;
        let CycleOutcome::Delivered { reply, .. } = outcome else {
            panic!("expected a fallback delivery, got {outcome:?}");
        };
        assert_eq!(reply.source, ReplySource::Fallback(FallbackReason::Timeout));
    }
    assert_eq!(orchestrator.client().breaker_status(), BreakerStatus::Open);

    h.surface.push_line("Mom: hello??");
    let outcome = orchestrator.run_once().await;
    let CycleOutcome::Delivered { reply, .. } = outcome else {
        panic!("expected a fallback delivery, got {outcome:?}");
    };
    assert_eq!(reply.source, ReplySource::Fallback(FallbackReason::CircuitOpen));
    assert!(!reply.text.is_empty());
    assert_eq!(h.provider.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn unchanged_surface_stops_at_the_detector() {
    let h = Harness::new("Mom: are you free tonight?", ScriptedProvider::replying("Yes!"));
    let mut orchestrator = h.orchestrator(&quick_config());

    orchestrator.run_once().await;
    for _ in 0..3 {
        assert_eq!(orchestrator.run_once().await, CycleOutcome::Unchanged);
    }
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.injector.submitted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn own_message_is_not_answered() {
    let h = Harness::new("Nitesh: On my way", ScriptedProvider::replying("?"));
    let mut orchestrator = h.orchestrator(&quick_config());

    assert_eq!(
        orchestrator.run_once().await,
        CycleOutcome::Rejected(Rejection::SelfAuthored)
    );
    assert_eq!(h.provider.calls(), 0);
    assert!(h.injector.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn same_message_twice_is_a_duplicate() {
    let h = Harness::new("Mom: call me.", ScriptedProvider::replying("Calling!"));
    let mut orchestrator = h.orchestrator(&quick_config());

    assert!(matches!(
        orchestrator.run_once().await,
        CycleOutcome::Delivered { .. }
    ));

    // The chat scrolls: an older line drops off, the last message is the same.
    h.surface.set_text("Dad: hi.\nMom: call me.");
    assert_eq!(
        orchestrator.run_once().await,
        CycleOutcome::Rejected(Rejection::Duplicate)
    );
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_still_replies() {
    let h = Harness::new(
        "Mom: are you free tonight?",
        ScriptedProvider::new(ScriptedOutcome::Fail(ProviderError::AuthFailed {
            provider: "scripted".into(),
        })),
    );
    let mut orchestrator = h.orchestrator(&quick_config());

    let outcome = orchestrator.run_once().await;
    let CycleOutcome::Delivered { reply, .. } = outcome else {
        panic!("expected a fallback delivery, got {outcome:?}");
    };
    assert_eq!(reply.source, ReplySource::Fallback(FallbackReason::NonRetryable));
    assert_eq!(orchestrator.client().breaker_status(), BreakerStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn spawned_loop_primes_then_answers_new_messages() {
    let h = Harness::new("Mom: old question?", ScriptedProvider::replying("On it"));
    let config = BotConfig {
        check_interval: Duration::from_secs(4),
        ..quick_config()
    };
    let handle = h.orchestrator(&config).spawn();
    assert!(handle.is_running());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.provider.calls(), 0, "existing chat must not be answered");

    h.surface.push_line("Mom: new question?");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.injector.submitted(), vec!["On it"]);

    handle.stop();
    let status = handle.join().await.expect("loop task finished cleanly");
    assert!(!status.running);
    assert_eq!(status.replies_delivered, 1);
    assert_eq!(status.last_reply.as_deref(), Some("On it"));
}

#[tokio::test(start_paused = true)]
async fn reply_to_existing_answers_the_backlog() {
    let h = Harness::new("Mom: old question?", ScriptedProvider::replying("Sorry, late!"));
    let config = BotConfig {
        reply_to_existing_on_start: true,
        ..quick_config()
    };
    let handle = h.orchestrator(&config).spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    handle.join().await.expect("loop task finished cleanly");
    assert_eq!(h.injector.submitted(), vec!["Sorry, late!"]);
}

#[tokio::test(start_paused = true)]
async fn stop_during_generation_sends_nothing() {
    let h = Harness::new(
        "",
        ScriptedProvider::new(ScriptedOutcome::Delayed(
            Duration::from_secs(3),
            "too late".into(),
        )),
    );
    let config = BotConfig {
        reply_to_existing_on_start: true,
        ..quick_config()
    };
    let handle = h.orchestrator(&config).spawn();

    // First cycle sees an empty chat.
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.surface.set_text("Mom: are you there?");
    tokio::time::sleep(Duration::from_secs(4)).await;
    // The cycle that started at t=4s is still waiting on the provider.
    handle.stop();

    let status = handle.join().await.expect("loop task finished cleanly");
    assert!(h.injector.events().is_empty());
    assert_eq!(status.replies_delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_delivery_lets_the_send_finish() {
    let h = Harness::new("Mom: are you there?", ScriptedProvider::replying("Yes, here!"));
    let config = BotConfig {
        reply_to_existing_on_start: true,
        delivery_attempts: 3,
        delivery_retry_pause: Duration::from_secs(2),
        ..quick_config()
    };
    // The message box shows up on the third lookup, at t=4s.
    h.surface.miss_locates(2);
    let handle = h.orchestrator(&config).spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.injector.submitted().is_empty());
    handle.stop();

    let status = handle.join().await.expect("loop task finished cleanly");
    assert_eq!(h.injector.submitted(), vec!["Yes, here!"]);
    assert_eq!(h.surface.locate_calls(), 3);
    assert_eq!(status.replies_delivered, 1);
    assert!(!status.running);
}

#[tokio::test]
async fn transcript_surface_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.txt");
    tokio::fs::write(&path, "Mom: are you free tonight?\n")
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::replying("Yes! What time?"));
    let mut orchestrator = Orchestrator::from_config(
        &quick_config(),
        Arc::new(TranscriptSurface::new(&path)),
        Arc::new(ConsoleInjector::new("Nitesh").with_transcript_echo(&path)),
        provider.clone(),
    );

    assert!(matches!(
        orchestrator.run_once().await,
        CycleOutcome::Delivered { .. }
    ));
    let transcript = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(transcript.ends_with("Nitesh: Yes! What time?\n"));

    // Our own echoed reply is seen on the next poll and ignored.
    assert_eq!(
        orchestrator.run_once().await,
        CycleOutcome::Rejected(Rejection::SelfAuthored)
    );
    assert_eq!(provider.calls(), 1);
}
