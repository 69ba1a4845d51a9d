//! Interactive bridge binary.
//!
//! Reads lines from stdin and drives one channel's session: `/start`,
//! `/stop`, `/status`, anything else is sent to the agent. Output goes to
//! the console, or to Slack when a bot token and channel are configured.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use relayclaw::channels::{ConsoleSink, SlackSink};
use relayclaw::session::SendOutcome;
use relayclaw::{Config, EventSink, PacedSink, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "relayclaw", version, about = "Bridge a chat channel to a coding agent")]
struct Cli {
    /// Working directory for the session (must exist).
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Continue the engine's most recent conversation on session start.
    #[arg(long = "continue")]
    continue_most_recent: bool,

    /// Skip all approval prompts inside the engine.
    #[arg(long)]
    skip_approvals: bool,

    /// Post output to this Slack channel instead of the console.
    #[arg(long, env = "SLACK_CHANNEL")]
    slack_channel: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relayclaw=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if cli.continue_most_recent {
        config.agent.continue_most_recent = true;
    }
    if cli.skip_approvals {
        config.agent.skip_approvals = true;
    }
    if cli.slack_channel.is_some() {
        config.slack.channel = cli.slack_channel.clone();
    }

    let engine = Arc::new(relayclaw::engine::ClaudeCodeEngine::new(
        config.agent.claude_binary.clone(),
    ));
    let registry = Arc::new(SessionRegistry::new(
        engine,
        config.agent.clone(),
        config.turn.clone(),
    ));

    let (channel_id, sink): (String, Arc<dyn EventSink>) =
        match (&config.slack.bot_token, &config.slack.channel) {
            (Some(token), Some(channel)) => {
                tracing::info!(channel = %channel, "Posting output to Slack");
                let slack = Arc::new(SlackSink::new(token.clone(), channel.clone()));
                (
                    channel.clone(),
                    Arc::new(PacedSink::new(slack, config.min_post_interval)),
                )
            }
            _ => ("console".to_string(), Arc::new(ConsoleSink)),
        };

    println!("relayclaw ready. /start [prompt], /stop, /status, /quit; anything else is sent to the agent.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("/start") {
            let prompt = rest.trim();
            let prompt = (!prompt.is_empty()).then_some(prompt);
            match registry
                .start_session(&channel_id, prompt, Arc::clone(&sink), cli.cwd.clone())
                .await
            {
                Ok(()) => println!("session started"),
                Err(e) => eprintln!("could not start session: {e}"),
            }
        } else if line == "/stop" {
            registry.end_session(&channel_id).await;
            println!("session ended");
        } else if line == "/status" {
            match registry.session_info(&channel_id).await {
                Some(info) => println!(
                    "started {}, {} message(s), cwd {}, {}",
                    info.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    info.message_count,
                    info.cwd.display(),
                    if info.waiting_for_input {
                        "waiting for input"
                    } else {
                        "working"
                    }
                ),
                None => println!("no active session"),
            }
        } else if line == "/quit" {
            registry.end_session(&channel_id).await;
            break;
        } else {
            match registry.send_message(&channel_id, line).await {
                SendOutcome::Accepted => {}
                SendOutcome::Queued => println!("(queued; will run after the current turn)"),
                SendOutcome::NoSession => println!("no active session; use /start first"),
            }
        }
    }

    Ok(())
}
