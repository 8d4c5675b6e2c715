mod in_memory;
pub mod messages;

pub use in_memory::InMemoryBus;

use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish on topic {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

/// A message a producer can publish (spec §4.2): self-describing content
/// type, topic name, and a serialized body.
pub trait TopicMessage: Send + Sync {
    fn content_type(&self) -> &'static str {
        "application/json"
    }
    fn topic_name(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns `BusError::PublishFailed` if the message cannot be
    /// serialized.
    fn body(&self) -> Result<Vec<u8>, BusError>;
}

/// A per-topic consumer (spec §4.2). Returning `Err` nacks the delivery;
/// the bus redelivers after a delay. Handlers must be idempotent since
/// delivery is at-least-once.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), BusError>;
}

/// Topic-based publish/subscribe with durable, per-topic ordered consumers
/// (spec §4.2).
#[async_trait]
pub trait Bus: Send + Sync {
    fn register_topic_handler(&self, topic: &str, handler: Arc<dyn TopicHandler>);

    /// # Errors
    ///
    /// Returns `BusError::PublishFailed` if the message body cannot be
    /// serialized or the topic's queue has been closed.
    async fn publish_on_topic(&self, message: &dyn TopicMessage) -> Result<(), BusError>;

    async fn start(&self);
    async fn close(&self);
}
