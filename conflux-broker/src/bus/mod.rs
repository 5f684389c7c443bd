//! Event bus
//!
//! Publish/subscribe over named channels. Payloads travel as UTF-8 JSON and
//! are decoded back into the subscriber's type before its handler runs.
//!
//! Delivery is broadcast: every handler registered for an event name sees
//! every emission made after it registered. Nothing is replayed to late
//! subscribers. A failing or panicking handler is logged and does not affect
//! other handlers or the publisher.
//!
//! The bus is constructed once per process and passed by reference to the
//! components that need it. [`EventBus::shutdown`] stops every subscription.

mod local;
mod redis_pubsub;

pub use local::LocalTransport;
pub use redis_pubsub::RedisTransport;

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

/// Errors that can occur on the event bus
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the pub/sub backend
    #[error("Event bus connection failed: {0}")]
    ConnectionFailed(String),

    /// The backend rejected a publish or subscribe
    #[error("Event bus transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// Payload could not be encoded as JSON
    #[error("Failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Raw messages received on one channel
pub type MessageStream = BoxStream<'static, String>;

/// Backend that moves encoded payloads between publishers and subscribers
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publishes `payload` on `channel`, returning how many subscribers got it
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;

    /// Opens a new independent subscription on `channel`
    ///
    /// The subscription is active once this returns.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}

/// Publish/subscribe bus keyed by event name
pub struct EventBus {
    transport: Arc<dyn PubSubTransport>,
    subscriptions: Mutex<Vec<AbortHandle>>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            transport,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Bus confined to the current process
    pub fn local() -> Self {
        Self::new(Arc::new(LocalTransport::new()))
    }

    /// Bus backed by Redis pub/sub
    pub async fn redis(redis_url: &str) -> Result<Self> {
        let transport = RedisTransport::connect(redis_url).await?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Serializes `payload` and broadcasts it on `event`
    ///
    /// Returns the number of subscriptions the message was delivered to.
    pub async fn emit<T>(&self, event: &str, payload: &T) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_string(payload)?;
        let delivered = self.transport.publish(event, encoded).await?;
        debug!(event, delivered, "Event emitted");
        Ok(delivered)
    }

    /// Registers `handler` for every future emission of `event`
    ///
    /// Registration is additive; each call adds an independent handler.
    /// Messages that do not decode into `T` are logged and skipped.
    pub async fn on<T, F, Fut>(&self, event: &str, handler: F) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut messages = self.transport.subscribe(event).await?;
        let event_name = event.to_string();

        let task = tokio::spawn(async move {
            while let Some(raw) = messages.next().await {
                let payload: T = match serde_json::from_str(&raw) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(event = %event_name, "Dropping undecodable payload: {}", e);
                        continue;
                    }
                };

                // Own task per invocation so a panic stays inside it
                match tokio::spawn(handler(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(event = %event_name, "Event handler failed: {:#}", e),
                    Err(e) => error!(event = %event_name, "Event handler panicked: {}", e),
                }
            }
            debug!(event = %event_name, "Subscription stream ended");
        });

        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task.abort_handle());

        Ok(Subscription {
            event: event.to_string(),
            task,
        })
    }

    /// Stops every subscription registered through this bus
    pub fn shutdown(&self) {
        let handles = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        debug!("Stopping {} event subscription(s)", handles.len());
        for handle in handles {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Handle to one registered handler
///
/// Dropping the handle leaves the handler running.
#[derive(Debug)]
pub struct Subscription {
    event: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}
