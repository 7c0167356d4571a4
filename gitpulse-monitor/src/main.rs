//! GitPulse monitor service.
//!
//! Consumes intent commands, harvests commit history and repository
//! metadata from GitHub under a per-repository lock, and publishes the
//! results back onto the commits queue in batches.

use anyhow::Context;
use futures_util::StreamExt;
use gitpulse_config::MonitorConfig;
use gitpulse_core::{
    Broker, GitHubClient, HarvestPipeline, Publisher, RedisRepositoryLock, RepositoryLock,
    monitor::{commits_resolver, repo_info_resolver},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitpulse_monitor=debug,gitpulse_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::load().context("failed to load monitor configuration")?;

    let lock: Arc<dyn RepositoryLock> = Arc::new(
        RedisRepositoryLock::connect(&config.redis_url)
            .await
            .context("failed to connect to redis")?,
    );

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

    let github = GitHubClient::new(&config.github_token).context("failed to build github client")?;

    let cancel = CancellationToken::new();
    let (pipeline, commits_rx, repo_info_rx) =
        HarvestPipeline::new(github, lock, cancel.clone());
    let pipeline = Arc::new(pipeline);

    let commits = tokio::spawn(commits_resolver(
        commits_rx,
        broker.clone() as Arc<dyn Publisher>,
        config.rabbitmq_publish_queue.clone(),
        cancel.clone(),
    ));
    let repo_info = tokio::spawn(repo_info_resolver(
        repo_info_rx,
        broker.clone() as Arc<dyn Publisher>,
        config.rabbitmq_publish_queue.clone(),
        cancel.clone(),
    ));

    tokio::spawn(shutdown_signal(cancel.clone()));

    consume_intents(
        broker.clone(),
        &config.rabbitmq_consume_queue,
        pipeline.clone(),
        cancel.clone(),
    )
    .await;

    // Dropping the last pipeline handle closes the channels, letting the
    // resolvers drain and flush whatever is still queued.
    drop(pipeline);
    if let Err(err) = commits.await {
        error!(%err, "commits resolver panicked");
    }
    if let Err(err) = repo_info.await {
        error!(%err, "repo info resolver panicked");
    }
    if let Err(err) = broker.close().await {
        warn!(%err, "failed to close broker channel");
    }
    info!("monitor stopped");
    Ok(())
}

/// Consumes intent commands, running each harvest on its own task.
/// Returns once cancelled and all in-flight harvests have finished.
async fn consume_intents(
    broker: Arc<Broker>,
    queue: &str,
    pipeline: Arc<HarvestPipeline>,
    cancel: CancellationToken,
) {
    let mut consumer = match broker.consume(queue, "gitpulse-monitor").await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(%err, queue, "failed to start intents consumer");
            cancel.cancel();
            return;
        }
    };
    info!(queue, "intents consumer started");

    let mut workers: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            delivery = consumer.next() => {
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(err)) => {
                        error!(%err, "intents consumer failed");
                        break;
                    }
                    None => break,
                };
                let pipeline = pipeline.clone();
                workers.spawn(async move {
                    if let Err(err) = pipeline.handle_message(&delivery.data).await {
                        warn!(%err, "dropping intent command");
                    }
                });
            }
            // Opportunistic reaping keeps the set from growing unboundedly.
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
            _ = cancel.cancelled() => break,
        }
    }

    info!(in_flight = workers.len(), "waiting for in-flight harvests");
    while workers.join_next().await.is_some() {}
    info!("intents consumer stopped");
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
