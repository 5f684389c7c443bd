//! Redis pub/sub transport
//!
//! Publishing goes through a shared [`ConnectionManager`] that reconnects on
//! its own. Each subscription holds a dedicated connection in subscriber
//! mode, as Redis requires.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{BusError, MessageStream, PubSubTransport, Result};

pub struct RedisTransport {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisTransport {
    /// Connects to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;
        debug!(channel, "Subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), "Dropping non-text message: {}", e);
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
