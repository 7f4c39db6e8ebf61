//! Cross-process delivery strategies for the live update broker.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::AsyncCommands;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Transport connection closed")]
    Closed,
}

/// An inbound pub/sub message: (channel, payload).
pub type InboundMessage = (String, String);

/// Seam between the broker and whatever carries payloads between processes.
/// Production uses [`RedisTransport`]; tests swap in a recording mock.
#[async_trait]
pub trait CrossProcessTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;
}

/// Shared Redis publisher/subscriber pair, created at most once per process
/// and multiplexed across every tenant's channel.
pub struct RedisTransport {
    publisher: ConnectionManager,
    sink: Mutex<PubSubSink>,
}

impl RedisTransport {
    /// Connect the pair and start the subscriber task. Returns the
    /// transport plus the inbound message stream the broker mirrors from.
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundMessage>), TransportError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        let pubsub = client.get_async_pubsub().await?;
        let (sink, mut stream) = pubsub.split();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send((channel, payload)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Undecodable pub/sub payload on {}: {}", channel, e);
                    }
                }
            }
            info!("Redis subscriber stream ended");
        });

        info!("Connected Redis live update transport");
        Ok((
            Arc::new(Self {
                publisher,
                sink: Mutex::new(sink),
            }),
            rx,
        ))
    }
}

#[async_trait]
impl CrossProcessTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut conn = self.publisher.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.sink.lock().await.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.sink.lock().await.unsubscribe(channel).await?;
        Ok(())
    }
}
