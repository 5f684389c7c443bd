//! In-process pub/sub transport

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use super::{MessageStream, PubSubTransport, Result};

const CHANNEL_CAPACITY: usize = 1024;

/// Transport backed by one tokio broadcast channel per event name
#[derive(Debug, Default)]
pub struct LocalTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl PubSubTransport for LocalTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        // send only fails when nobody is subscribed
        Ok(self.sender(channel).send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |message| {
            let channel = channel.clone();
            async move {
                match message {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
