//! # portal
//!
//! Command-line chat client: sends one prompt through a [`ChatSession`],
//! prints the reply as it streams and reports context usage.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use portal_core::events::SessionEvent;
use portal_core::ids::{ConversationId, UserId};
use portal_gateway::HttpChatGateway;
use portal_session::{ChatSession, ModelSelection, SessionConfig, TurnOptions, TurnOutcome};
use portal_settings::{load_settings, load_settings_from_path, PortalSettings};
use portal_store::SqliteConversationStore;
use portal_telemetry::{init_telemetry, TelemetryConfig};

/// Streaming chat client.
#[derive(Parser, Debug)]
#[command(name = "portal", about = "Send a prompt and stream the reply")]
struct Cli {
    /// Settings file (defaults to `~/.portal/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Model id to use instead of the configured default.
    #[arg(long)]
    model: Option<String>,

    /// Context capacity of `--model`.
    #[arg(long)]
    max_tokens: Option<u64>,

    /// Continue an existing conversation. A new one is started otherwise.
    #[arg(long)]
    conversation: Option<String>,

    #[arg(long, default_value = "local")]
    user: String,

    /// Ask the backend to run a deep research job.
    #[arg(long)]
    deep_research: bool,

    #[arg(long)]
    thinking: bool,

    /// The prompt.
    #[arg(required = true)]
    prompt: Vec<String>,
}

impl Cli {
    fn model_selection(&self, settings: &PortalSettings) -> ModelSelection {
        match &self.model {
            Some(id) => ModelSelection::new(
                id.clone(),
                id.clone(),
                self.max_tokens.unwrap_or(settings.model.default_max_tokens),
            ),
            None => ModelSelection::new(
                settings.model.default_model.clone(),
                settings.model.default_model_name.clone(),
                self.max_tokens.unwrap_or(settings.model.default_max_tokens),
            ),
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;

    if settings.logging.log_to_sqlite {
        ensure_parent_dir(Path::new(&settings.logging.log_db_path))?;
    }
    let _telemetry = init_telemetry(TelemetryConfig::from_parts(
        &settings.logging.level,
        settings.logging.log_to_sqlite,
        &settings.logging.log_db_path,
    ));

    let db_path = PathBuf::from(&settings.storage.db_path);
    ensure_parent_dir(&db_path)?;
    let store = SqliteConversationStore::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    let gateway = HttpChatGateway::new(
        settings.gateway.url.clone(),
        settings.gateway.api_key.clone(),
        Duration::from_millis(settings.gateway.connect_timeout_ms),
    )?;
    tracing::info!(url = gateway.url(), "gateway configured");

    let session = Arc::new(ChatSession::new(
        Arc::new(gateway),
        Arc::new(store.clone()),
        SessionConfig::from_settings(&settings),
    ));
    session.set_user(Some(UserId::from_raw(cli.user.clone())));

    let conversation_id = cli
        .conversation
        .clone()
        .map_or_else(ConversationId::new, ConversationId::from_raw);
    let history = store
        .conversation_history(&conversation_id)
        .await
        .context("Failed to load conversation history")?;
    let _ = session
        .open_conversation(conversation_id.clone(), history, cli.model_selection(&settings))
        .await;
    eprintln!("conversation: {conversation_id}");

    let printer = tokio::spawn(print_events(session.subscribe()));
    let stopper = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = session.stop();
            }
        })
    };

    let options = TurnOptions {
        deep_research: cli.deep_research,
        thinking: cli.thinking,
        ..TurnOptions::default()
    };
    let result = session.send(&cli.prompt.join(" "), options).await;
    stopper.abort();
    drop(session);
    let _ = printer.await;

    match result? {
        TurnOutcome::Completed { latency, .. } => {
            tracing::info!(latency_ms = latency.as_millis() as u64, "reply complete");
        }
        TurnOutcome::Cancelled => eprintln!("\n(cancelled)"),
    }
    Ok(())
}

/// Print reply text as it is committed, then the usage line.
async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    let mut printed = 0;
    let mut stdout = std::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "printer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            SessionEvent::ContentFlushed { content, .. } => {
                if let Some(fresh) = content.get(printed..) {
                    let _ = write!(stdout, "{fresh}");
                    let _ = stdout.flush();
                }
                printed = content.len();
            }
            SessionEvent::ResearchActivated { job, .. } => {
                eprintln!("[research job {} started]", job.job_id);
            }
            SessionEvent::UsageUpdated { usage } => {
                eprintln!(
                    "\n[{}: {}/{} tokens, {:.1}%]",
                    usage.model_name, usage.total_tokens, usage.max_tokens, usage.percent_used
                );
            }
            SessionEvent::TurnComplete { .. } | SessionEvent::TurnCancelled => {
                println!();
                break;
            }
            SessionEvent::TurnFailed { error } => {
                eprintln!("\nerror: {error}");
                break;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_prompt_words_are_joined() {
        let cli = Cli::parse_from(["portal", "what", "is", "2+2?"]);
        assert_eq!(cli.prompt.join(" "), "what is 2+2?");
        assert_eq!(cli.user, "local");
        assert!(!cli.deep_research);
    }

    #[test]
    fn cli_requires_prompt() {
        assert!(Cli::try_parse_from(["portal"]).is_err());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from([
            "portal",
            "--model",
            "llama3",
            "--max-tokens",
            "8000",
            "--conversation",
            "conv_1",
            "--deep-research",
            "hello",
        ]);
        assert_eq!(cli.conversation.as_deref(), Some("conv_1"));
        assert!(cli.deep_research);
        let model = cli.model_selection(&PortalSettings::default());
        assert_eq!(model.model_id.as_str(), "llama3");
        assert_eq!(model.max_tokens, 8000);
    }

    #[test]
    fn default_model_comes_from_settings() {
        let cli = Cli::parse_from(["portal", "hi"]);
        let model = cli.model_selection(&PortalSettings::default());
        assert_eq!(model.model_id.as_str(), "gpt-4o-mini");
        assert_eq!(model.max_tokens, 128_000);
    }
}
