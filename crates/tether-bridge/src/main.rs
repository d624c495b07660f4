//! `Tether` Bridge
//!
//! Relays permission requests and notifications from an agent-hosting
//! process to a human operator over a messaging channel, and accepts
//! remote commands back. The host talks NDJSON over stdin/stdout; the
//! operator talks through the configured channel backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use tether_core::config::{self, ChannelKind};
use tether_core::sessions::CliSessionHost;
use tether_core::{SessionHost, StateStore};

use tether_bridge::channel::Channel;
use tether_bridge::channel::telegram::TelegramChannel;
use tether_bridge::dispatcher::RemoteDispatcher;
use tether_bridge::hook::{HookRunner, write_lines};
use tether_bridge::notify::NotificationEmitter;
use tether_bridge::orchestrator::PermissionOrchestrator;
use tether_bridge::pending::PendingStore;

#[derive(Parser, Debug)]
#[command(name = "tether-bridge")]
#[command(version, about = "Tether bridge - remote permission relay")]
struct Args {
    /// Config file path (default: the platform config dir)
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Bridge state file path (default: the platform config dir)
    #[arg(long, env = "TETHER_STATE_PATH")]
    state_path: Option<PathBuf>,

    /// Log level filter for the bridge (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "TETHER_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TETHER_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("tether_bridge={}", args.log_level);
    tether_core::tracing_init::init_tracing(&log_filter, args.log_json);

    // Fatal before any partial operation: missing credentials or an
    // unimplemented channel must not leave a half-started bridge.
    let cfg = config::load_config(args.config.as_deref())?;
    cfg.validate()?;

    let state_path = args
        .state_path
        .clone()
        .or_else(config::default_state_path)
        .context("Cannot determine state file path")?;
    let state = StateStore::load(&state_path)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        channel = cfg.channel.kind.as_str(),
        timeout_secs = cfg.permissions.effective_timeout().as_secs(),
        "Starting tether-bridge"
    );

    let (dispatcher_tx, dispatcher_rx) = mpsc::channel(64);
    let channel: Arc<dyn Channel> = match cfg.channel.kind {
        ChannelKind::Telegram => Arc::new(TelegramChannel::new(
            &cfg.channel.telegram,
            state.clone(),
            dispatcher_tx,
        )?),
        // validate() already rejected these.
        other => anyhow::bail!("channel '{}' is not implemented", other.as_str()),
    };

    let store = PendingStore::new(cfg.permissions.effective_timeout());
    channel.set_response_sink(Arc::new(store.clone()));
    channel.start().await?;

    let session_dir = cfg
        .host
        .session_dir()
        .context("Cannot determine host session directory")?;
    let host: Arc<dyn SessionHost> =
        Arc::new(CliSessionHost::new(cfg.host.claude_bin.clone(), session_dir));
    let dispatcher = RemoteDispatcher::new(Arc::clone(&channel), host, state.clone());
    tokio::spawn(dispatcher.run(dispatcher_rx));

    let orchestrator = Arc::new(PermissionOrchestrator::new(
        Arc::clone(&channel),
        store.clone(),
    ));
    let emitter = Arc::new(NotificationEmitter::new(
        Arc::clone(&channel),
        cfg.notifications.clone(),
    ));
    let runner = Arc::new(HookRunner::new(orchestrator, emitter));

    let (out_tx, out_rx) = mpsc::channel(64);
    let writer_handle = tokio::spawn(write_lines(out_rx, tokio::io::stdout()));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let hook_handle = tokio::spawn(runner.run(stdin, out_tx));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Bridge ready");

    tokio::select! {
        _ = hook_handle => {
            info!("Hook feed ended (host closed stdin)");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    channel.stop().await;
    let cleared = store.clear().await;
    if cleared > 0 {
        warn!(cleared, "Cleared outstanding permission requests at shutdown");
    }
    // Give in-flight decision lines a moment to drain to the host.
    let _ = tokio::time::timeout(Duration::from_secs(2), writer_handle).await;

    info!("Bridge stopped");
    Ok(())
}
