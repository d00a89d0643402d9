//! Rowcast Server - replays record store activity from stdin.

use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rowcast_core::{NotificationEngine, SharedNotificationEngine};
use rowcast_server::{start_dispatcher, Args, Replay};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries events only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rowcast_server=info,rowcast_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting rowcast server");

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        schema = %config.schema_path.display(),
        event_capacity = config.event_capacity,
        queue_size = config.queue_size,
        propagate_bulk = config.propagate_bulk,
        "configuration loaded"
    );

    let schema = config.load_schema()?;
    let engine: SharedNotificationEngine = Arc::new(NotificationEngine::with_config(
        &schema,
        config.engine_config(),
    )?);
    let handle = start_dispatcher(Arc::clone(&engine), config.queue_size);

    let mut replay = Replay::new(handle);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    tracing::info!("reading commands from stdin");
    let summary = replay.run(stdin, &mut stdout).await?;

    let metrics = engine.metrics();
    tracing::info!(
        commands = summary.commands,
        errors = summary.errors,
        events = summary.events,
        notifications = metrics.notifications_emitted,
        active_subscriptions = engine.registry().subscription_count(),
        "replay complete"
    );

    Ok(())
}
