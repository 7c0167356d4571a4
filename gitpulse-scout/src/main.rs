//! GitPulse scout service.
//!
//! Mirrors the intent command stream into redis and re-broadcasts every
//! stored intent on an interval, so harvests lost to races or broker
//! hiccups are eventually retried.

use anyhow::Context;
use futures_util::StreamExt;
use gitpulse_config::ScoutConfig;
use gitpulse_core::{Broker, Publisher, ScoutService};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitpulse_scout=debug,gitpulse_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ScoutConfig::load().context("failed to load scout configuration")?;

    let broker = Arc::new(
        Broker::connect(&config.rabbitmq_url)
            .await
            .context("failed to connect to rabbitmq")?,
    );
    broker
        .declare_queue(&config.rabbitmq_consume_queue)
        .await
        .context("failed to declare consume queue")?;
    broker
        .declare_queue(&config.rabbitmq_publish_queue)
        .await
        .context("failed to declare publish queue")?;

    let service = Arc::new(
        ScoutService::connect(
            &config.redis_url,
            broker.clone() as Arc<dyn Publisher>,
            config.rabbitmq_publish_queue.clone(),
        )
        .await
        .context("failed to connect to redis")?,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let sweeper = tokio::spawn(sweep_loop(
        service.clone(),
        Duration::from_secs(config.broadcast_interval_secs),
        cancel.clone(),
    ));

    consume_intents(
        broker.clone(),
        &config.rabbitmq_consume_queue,
        service,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    if let Err(err) = sweeper.await {
        error!(%err, "sweep loop panicked");
    }
    if let Err(err) = broker.close().await {
        warn!(%err, "failed to close broker channel");
    }
    info!("scout stopped");
    Ok(())
}

/// Applies inbound intent commands to the redis mirror.
async fn consume_intents(
    broker: Arc<Broker>,
    queue: &str,
    service: Arc<ScoutService>,
    cancel: CancellationToken,
) {
    let mut consumer = match broker.consume(queue, "gitpulse-scout").await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(%err, queue, "failed to start intents consumer");
            cancel.cancel();
            return;
        }
    };
    info!(queue, "intents consumer started");

    loop {
        let delivery = tokio::select! {
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(%err, "intents consumer failed");
                    break;
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if let Err(err) = service.process_message(&delivery.data).await {
            warn!(%err, "dropping intent command");
        }
    }
    info!("intents consumer stopped");
}

/// Re-broadcasts every mirrored intent once per interval.
async fn sweep_loop(service: Arc<ScoutService>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a restart does not
    // double-broadcast right after the previous sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = service.broadcast_all().await {
                    error!(%err, "intent sweep failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    info!("sweep loop stopped");
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(%err, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    cancel.cancel();
}
