//! Collab command-line client.
//!
//! # Usage
//!
//! ```bash
//! # Join room `demo` as `ada` on a local server
//! COLLAB_TOKEN=... collab --room demo --username ada
//!
//! # Custom server and a more patient reconnection policy
//! collab --endpoint wss://rooms.example.com --room demo --username ada \
//!     --token "$TOKEN" --max-attempts 10 --max-delay-ms 60000
//! ```
//!
//! Lines read from stdin are chat messages; see [`UserCommand`] for the
//! slash commands. Everything the session reports is logged.

use std::{io::BufRead, time::Duration};

use clap::Parser;
use collab_client::{EntryStatus, SessionEvent};
use collab_core::{ReconnectPolicy, StaticTokenProvider};
use collab_runtime::{Driver, RuntimeConfig, UserCommand};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Collab room client
#[derive(Parser, Debug)]
#[command(name = "collab")]
#[command(about = "Join a collaborative coding room")]
#[command(version)]
struct Args {
    /// Room server, `scheme://host[:port]`
    #[arg(short, long, default_value = "ws://localhost:8000")]
    endpoint: String,

    /// Room to join
    #[arg(short, long)]
    room: String,

    /// Name shown to other participants
    #[arg(short, long)]
    username: String,

    /// Access token
    #[arg(long, env = "COLLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Reconnection attempts before giving up
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Delay before the first reconnection attempt
    #[arg(long, default_value = "1000")]
    base_delay_ms: u64,

    /// Upper bound on the reconnection delay
    #[arg(long, default_value = "30000")]
    max_delay_ms: u64,

    /// Handshake timeout
    #[arg(long, default_value = "10000")]
    connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(args.base_delay_ms),
        max_delay: Duration::from_millis(args.max_delay_ms),
        max_attempts: args.max_attempts,
    };
    let mut config = RuntimeConfig::new(args.endpoint.clone()).with_policy(policy);
    config.connect_timeout = Duration::from_millis(args.connect_timeout_ms);

    let tokens = match args.token {
        Some(token) => StaticTokenProvider::new(token),
        None => {
            tracing::warn!("no token given (--token or COLLAB_TOKEN)");
            StaticTokenProvider::signed_out()
        },
    };

    tracing::info!(endpoint = %args.endpoint, room = %args.room, "collab starting");

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    spawn_input_thread(commands_tx)?;

    let driver = Driver::new(config, tokens);
    driver.run(&args.room, &args.username, commands_rx, log_event).await?;

    tracing::info!("bye");
    Ok(())
}

/// Forward stdin lines as commands until EOF.
///
/// Stdin is read on a plain thread: a pending tokio stdin read would keep the
/// runtime from shutting down.
fn spawn_input_thread(commands: mpsc::UnboundedSender<UserCommand>) -> std::io::Result<()> {
    std::thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("reading stdin: {e}");
                    break;
                },
            };

            match UserCommand::parse(&line) {
                Ok(Some(command)) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                },
                Ok(None) => {},
                Err(e) => tracing::warn!("{e}"),
            }
        }
    })?;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Opened { reconnected } => tracing::info!(reconnected, "connected"),
        SessionEvent::Closed { code, reason } => {
            tracing::info!(%code, %reason, "connection closed");
        },
        SessionEvent::Reconnecting { attempt, delay } => {
            tracing::warn!(attempt, delay = ?delay, "reconnecting");
        },
        SessionEvent::MembershipChanged(membership) => tracing::info!(?membership, "membership"),
        SessionEvent::CodeChanged(code) => tracing::info!(len = code.len(), "code:\n{code}"),
        SessionEvent::ChatMessage(entry) => {
            let pending = entry.status == EntryStatus::Provisional;
            tracing::info!(pending, "<{}> {}", entry.username, entry.content);
        },
        SessionEvent::RosterChanged(users) => tracing::info!("in room: {}", users.join(", ")),
        SessionEvent::Fatal { kind, message } => tracing::error!(?kind, "{message}"),
    }
}
