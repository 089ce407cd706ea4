use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use secrecy::SecretString;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use autoreply::config::{BotConfig, ConfigSource};
use autoreply::error::ConfigError;
use autoreply::llm::{GenerativeProvider, ResilienceConfig, ResilientAIClient, create_provider};
use autoreply::orchestrator::Orchestrator;
use autoreply::pipeline::types::{CandidateMessage, fingerprint, normalize_text};
use autoreply::pipeline::{ContextBuilder, MessageValidator, ValidatorConfig};
use autoreply::surface::{ConsoleInjector, TranscriptSurface};

const DEFAULT_TRANSCRIPT: &str = "./chat.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = BotConfig::from_env().context("Invalid configuration")?;

    let api_key = std::env::var("COHERE_API_KEY")
        .map_err(|_| ConfigError::MissingEnvVar("COHERE_API_KEY".to_string()))
        .context("Set COHERE_API_KEY to your Cohere API key")?;
    let provider = create_provider(&config, SecretString::from(api_key));

    match std::env::args().nth(1).as_deref() {
        None | Some("run") => run(config, provider).await,
        Some("test") => test_generation(&config, provider).await,
        Some(other) => bail!("Unknown command '{other}' (expected 'run' or 'test')"),
    }
}

/// stderr logging, plus a daily-rolling file when `AUTOREPLY_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("AUTOREPLY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "autoreply.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

/// Watch the transcript and answer until Ctrl-C.
async fn run(config: BotConfig, provider: Arc<dyn GenerativeProvider>) -> anyhow::Result<()> {
    let transcript = std::env::var("AUTOREPLY_TRANSCRIPT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_TRANSCRIPT));

    eprintln!("💬 autoreply v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Persona: {}", config.persona_name);
    eprintln!("   Language: {} / tone: {}", config.language_hint, config.tone);
    eprintln!("   Model: {}", config.model);
    eprintln!("   Transcript: {}", transcript.display());
    eprintln!("   Checking every {:?}. Ctrl-C to stop.\n", config.check_interval);

    let reader = Arc::new(TranscriptSurface::new(&transcript));
    let injector =
        Arc::new(ConsoleInjector::new(config.persona_name.clone()).with_transcript_echo(&transcript));

    let handle = Orchestrator::from_config(&config, reader, injector, provider).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    handle.stop();

    let status = handle.join().await.context("Orchestrator task failed")?;
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&status).context("Failed to render status")?
    );
    Ok(())
}

/// Read a chat history from stdin and print the reply it would get.
async fn test_generation(
    config: &BotConfig,
    provider: Arc<dyn GenerativeProvider>,
) -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read chat history from stdin")?;

    let history: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    let Some(last) = history.last().cloned() else {
        bail!("No chat history on stdin");
    };

    let validator = MessageValidator::new(ValidatorConfig {
        persona_name: config.persona_name().to_string(),
        ..ValidatorConfig::default()
    });
    let candidate = CandidateMessage {
        id: Uuid::new_v4(),
        inferred_sender: validator.infer_sender(&last),
        dedup_key: fingerprint(&normalize_text(&last)),
        text: last,
        history,
    };

    let builder = ContextBuilder::new(
        config.max_context_lines(),
        config.persona_name(),
        config.language_hint(),
    );
    let context = builder.build(&candidate, &candidate.history);

    let client = ResilientAIClient::new(provider, ResilienceConfig::from_source(config));
    let reply = client.generate_reply(&context).await;

    println!("{}", reply.text);
    eprintln!("source: {}", reply.source);
    Ok(())
}
