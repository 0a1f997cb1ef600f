//! perp_hub entry point
//!
//! 1. Loads `.env` and initializes logging
//! 2. Loads the YAML configuration (first argument, else `PERP_HUB_CONFIG`)
//! 3. Opens one WebSocket session through the connection manager
//! 4. Watches every configured channel and logs what arrives
//! 5. On Ctrl+C, closes the watches and disconnects

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use perp_hub::adapters::WsConnection;
use perp_hub::config::{self, constants};
use perp_hub::core::{init_logging, ConnectionManager, ManagerEvent, RateGovernor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    info!("perp_hub starting");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(constants::config_path()));
    let config = config::load_config(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    info!(
        url = %config.connection.url,
        channels = config.subscriptions.len(),
        "[CONFIG] Loaded"
    );

    // Validated up front so a bad budget fails at startup, not on first use
    let governor = RateGovernor::new(config.rate_limit.clone())?;
    info!(
        max_tokens = governor.max_tokens(),
        refill_rate = governor.refill_rate(),
        "[CONFIG] Rate budget"
    );

    let connection = Arc::new(WsConnection::new(
        config.connection.url.clone(),
        config.connection.reconnect.clone(),
    ));
    let manager = ConnectionManager::new(connection, config.stream.clone());
    manager.connect().await.context("opening streaming connection")?;

    let mut events = manager.events();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ManagerEvent::Error(e)) => warn!(error = %e, "[EVENT] Error"),
                Ok(ManagerEvent::Reconnected) => info!("[EVENT] Reconnected, subscriptions replayed"),
                Ok(event) => debug!(kind = event.kind(), "[EVENT]"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "[EVENT] Observer lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut watchers = JoinSet::new();
    for channel in &config.subscriptions {
        let mut stream = manager.watch(
            &channel.channel,
            channel.subscribe.clone(),
            channel.unsubscribe.clone(),
        );
        watchers.spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(payload) => info!(channel = %stream.channel(), payload = %payload, "[MSG]"),
                    Err(e) => error!(channel = %stream.channel(), error = %e, "[MSG] Watch failed"),
                }
            }
            stream.close().await;
        });
    }

    info!(watches = config.subscriptions.len(), "Streaming. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => info!("[SHUTDOWN] Graceful shutdown initiated"),
        Err(e) => error!(error = %e, "[SHUTDOWN] Failed to listen for Ctrl+C"),
    }

    manager.unsubscribe_all().await;
    watchers.shutdown().await;
    manager.disconnect().await;
    event_logger.abort();

    info!(
        dropped_messages = manager.dropped_message_count(),
        "[SHUTDOWN] Clean exit"
    );
    Ok(())
}
