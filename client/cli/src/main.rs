//! Chatstream CLI - Terminal Conversation Client
//!
//! Reads one message per line from stdin, streams the answer to stdout.
//!
//! # Usage
//!
//! ```bash
//! # Interactive, using ~/.config/chatstream/client.toml
//! chatstream
//!
//! # Pull only, against a local backend
//! chatstream --no-push --pull-url http://localhost:8000/api/generate/stream
//!
//! # One-shot
//! chatstream "What changed in the last release?"
//!
//! # Verbose logging (to stderr)
//! RUST_LOG=chatstream_core=debug chatstream
//! ```
//!
//! # Controls
//!
//! - `Ctrl-C` while an answer streams: stop generation
//! - `Ctrl-C` while idle, `/quit` or EOF: exit
//! - `/clear`: start a new conversation

mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chatstream_core::{
    default_config_path, load_config_from_path, ConfigOverrides, ConversationDriver, Locale,
    SessionUpdate,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use render::{parse_input, Input, LivePrinter};

/// Chatstream - streaming conversational client
#[derive(Parser, Debug)]
#[command(name = "chatstream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// WebSocket endpoint for the push transport
    #[arg(long, value_name = "URL")]
    push_url: Option<String>,

    /// HTTP endpoint for the pull transport
    #[arg(long, value_name = "URL")]
    pull_url: Option<String>,

    /// Target model identifier
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Never try the push transport
    #[arg(long)]
    no_push: bool,

    /// Notice language (ko, en)
    #[arg(long)]
    locale: Option<Locale>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHATSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Send this message, print the answer and exit
    prompt: Option<String>,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so the answer on stdout stays clean.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chatstream_cli={level},chatstream_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn overrides(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(url) = args.push_url.clone() {
        overrides = overrides.with_push_url(url);
    }
    if let Some(url) = args.pull_url.clone() {
        overrides = overrides.with_pull_url(url);
    }
    if let Some(model) = args.model.clone() {
        overrides = overrides.with_model(model);
    }
    if let Some(locale) = args.locale {
        overrides = overrides.with_locale(locale);
    }
    if args.no_push {
        overrides = overrides.without_push();
    }
    overrides
}

/// Stream one turn to stdout. Ctrl-C cancels the turn.
async fn run_turn(driver: &mut ConversationDriver, text: &str) -> Result<()> {
    if let Err(e) = driver.submit(text) {
        eprintln!("{e}");
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    let mut printer = LivePrinter::new();

    while !driver.can_send() {
        tokio::select! {
            update = driver.next_update() => match update {
                Some(SessionUpdate::Progress { step, .. }) => eprintln!("[{step}]"),
                Some(_) => {}
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                driver.cancel();
            }
        }

        if let Some(answer) = driver.messages().last() {
            let delta = printer.delta(&answer.content);
            if !delta.is_empty() {
                stdout.write_all(delta.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }

    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    if let Some(transport) = driver.last_transport() {
        info!(transport = %transport, "Turn finished");
    }
    Ok(())
}

async fn run_interactive(driver: &mut ConversationDriver) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                if let Err(e) = driver.clear() {
                    warn!(error = %e, "Could not clear conversation");
                } else {
                    eprintln!("[new conversation]");
                }
            }
            Input::Message(text) => run_turn(driver, text).await?,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    overrides(&args).apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = ?config.source(),
        push = config.push.is_active(),
        pull_url = %config.pull.url,
        model = %config.conversation.model_id,
        "Configuration loaded"
    );

    let mut driver =
        ConversationDriver::from_config(&config).context("Failed to build transports")?;

    match args.prompt.as_deref() {
        Some(prompt) => run_turn(&mut driver, prompt).await,
        None => run_interactive(&mut driver).await,
    }
}
