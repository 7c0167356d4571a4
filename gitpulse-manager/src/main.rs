//! GitPulse manager service.
//!
//! Owns the intent lifecycle: HTTP surface for creating and querying
//! intents, a broadcast loop publishing intent commands to the broker,
//! and an ingestion loop persisting harvested commits.

mod errors;
mod handlers;
mod routes;

use anyhow::Context;
use futures_util::StreamExt;
use gitpulse_config::ManagerConfig;
use gitpulse_core::{
    Broker, ManagerService, ManagerStore, PostgresStore, Publisher,
    manager::run_broadcast,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<ManagerService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gitpulse_manager=debug,gitpulse_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ManagerConfig::load().context("failed to load manager configuration")?;

    let store: Arc<dyn ManagerStore> = Arc::new(
        PostgresStore::connect(&config.database_url)
            .await
            .context("failed to connect to postgres")?,
    );

    let broker = Arc::new(
        Broker::connect(&config.rabbitmq_url)
            .await
            .context("failed to connect to rabbitmq")?,
    );
    broker
        .declare_queue(&config.intents_queue_name)
        .await
        .context("failed to declare intents queue")?;
    broker
        .declare_queue(&config.commits_queue_name)
        .await
        .context("failed to declare commits queue")?;

    let (service, intents_rx) = ManagerService::new(store.clone());
    let service = Arc::new(service);
    let cancel = CancellationToken::new();

    let broadcast = tokio::spawn(run_broadcast(
        store.clone(),
        intents_rx,
        broker.clone() as Arc<dyn Publisher>,
        config.intents_queue_name.clone(),
        cancel.clone(),
    ));

    let ingestion = tokio::spawn(consume_commits(
        broker.clone(),
        config.commits_queue_name.clone(),
        service.clone(),
        cancel.clone(),
    ));

    tokio::spawn(shutdown_signal(cancel.clone()));

    let app = routes::create_router(AppState {
        service: service.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .context("server error")?;

    // The handlers hold the only other service reference through the
    // router; dropping ours after serve returns closes the broadcast
    // queue once they finish.
    cancel.cancel();
    drop(service);

    if let Err(err) = ingestion.await {
        error!(%err, "ingestion task panicked");
    }
    if let Err(err) = broadcast.await {
        error!(%err, "broadcast task panicked");
    }
    if let Err(err) = broker.close().await {
        warn!(%err, "failed to close broker channel");
    }
    info!("manager stopped");
    Ok(())
}

/// Drains the commits queue into the service. Malformed or unknown
/// payloads are logged and dropped, the loop keeps going.
async fn consume_commits(
    broker: Arc<Broker>,
    queue: String,
    service: Arc<ManagerService>,
    cancel: CancellationToken,
) {
    let mut consumer = match broker.consume(&queue, "gitpulse-manager").await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(%err, queue, "failed to start commits consumer");
            cancel.cancel();
            return;
        }
    };
    info!(queue, "commits consumer started");

    loop {
        let delivery = tokio::select! {
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(%err, "commits consumer failed");
                    break;
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if let Err(err) = service.process_commits_message(&delivery.data).await {
            warn!(%err, "dropping commits message");
        }
    }
    info!("commits consumer stopped");
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
