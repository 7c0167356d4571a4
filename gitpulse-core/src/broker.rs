//! RabbitMQ plumbing shared by all three services.
//!
//! One connection, one channel per process; durable queues; JSON bodies.
//! Publishing goes through the [`Publisher`] trait so the broadcast and
//! resolver loops can be exercised without a live broker.

use crate::error::Result;
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
};
use serde::Serialize;
use tracing::{debug, info};

/// Anything that can push a message body onto a named queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;
}

/// Thin wrapper over a lapin connection/channel pair.
pub struct Broker {
    _conn: Connection,
    channel: Channel,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish_non_exhaustive()
    }
}

impl Broker {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("connecting to broker");
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;
        Ok(Self {
            _conn: conn,
            channel,
        })
    }

    /// Declares a durable queue, creating it if absent.
    pub async fn declare_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Registers this process as the consumer of `queue`.
    pub async fn consume(&self, queue: &str, tag: &str) -> Result<Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    pub async fn publish_json<T: Serialize>(&self, queue: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.publish(queue, &body).await
    }

    pub async fn close(&self) -> Result<()> {
        self.channel.close(200, "shutting down").await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        debug!(queue, bytes = body.len(), "publishing message");
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }
}
