//! livefeed application library.

mod cli;
mod printer;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livefeed_engine::{Broadcaster, ChannelSubscriber, ConnectionManager};
use livefeed_ipc::{subscriber_channel, ConnectOptions, Settings};
use livefeed_official::{OfficialBackend, UnavailableConnector};
use livefeed_transport::RawBackend;

pub use cli::Args;

/// How often the session is checked for having ended on its own.
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Initialize logging. Logs go to stderr; stdout carries events.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livefeed=info,livefeed_lib=info,livefeed_engine=debug,livefeed_official=info,livefeed_transport=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Connect, stream events to stdout until Ctrl-C or the session ends, then tear down.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    if args.no_fallback {
        settings.fallback_enabled = false;
    }

    let broadcaster = Arc::new(Broadcaster::new());
    let (tx, rx) = subscriber_channel();
    let stdout_subscriber = Arc::new(ChannelSubscriber::new(tx));
    broadcaster.add(&stdout_subscriber);
    let printer = printer::spawn(rx).context("failed to start stdout printer")?;

    let official = Arc::new(OfficialBackend::new(
        Arc::new(UnavailableConnector),
        settings.official.connect_timeout_ms,
    ));
    let raw = Arc::new(RawBackend::new(settings.raw.clone()).context("failed to build raw backend")?);
    let manager = ConnectionManager::new(settings, official, raw, broadcaster);

    let result = session(&manager, &args).await;

    // Dropping the last sender ends the printer after it drains.
    drop(manager);
    drop(stdout_subscriber);
    join_printer(printer).await;

    result
}

/// Wait for the printer thread off the runtime. Returns the lines written.
async fn join_printer(printer: JoinHandle<u64>) -> Option<u64> {
    match tokio::task::spawn_blocking(move || printer.join()).await {
        Ok(Ok(lines)) => Some(lines),
        Ok(Err(_)) => {
            warn!("Stdout printer panicked");
            None
        }
        Err(e) => {
            warn!("Failed to join stdout printer: {}", e);
            None
        }
    }
}

async fn session(manager: &ConnectionManager, args: &Args) -> anyhow::Result<()> {
    manager
        .connect(&args.handle, args.mode, ConnectOptions::default())
        .await
        .with_context(|| format!("failed to connect to {}", args.handle))?;

    info!("Streaming events, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(SESSION_POLL_INTERVAL);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("Ctrl-C received");
                break;
            }
            _ = poll.tick() => {
                let state = manager.state();
                if state.is_disconnected() {
                    info!("Session ended");
                    break;
                }
                if state.is_failed() {
                    manager.disconnect().await;
                    anyhow::bail!(
                        "session failed: {}",
                        state.failure_reason.unwrap_or_default()
                    );
                }
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}
