use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::selector::Selector;

pub mod destinations {
    pub const GEO_PROCESSING: &str = "geo.processing.queue";
    pub const BILLING_PROCESSING: &str = "billing.processing.queue";
    pub const DASHBOARD_GENERATION: &str = "dashboard.generation.queue";
    pub const DASHBOARD_SAVE: &str = "dashboard.save.queue";
    pub const NOTIFICATION: &str = "notification.queue";

    pub const ALL: [&str; 5] = [
        GEO_PROCESSING,
        BILLING_PROCESSING,
        DASHBOARD_GENERATION,
        DASHBOARD_SAVE,
        NOTIFICATION,
    ];
}

/// Payload type discriminator attached to every published message.
pub const TYPE_HEADER: &str = "_type";
pub const MESSAGE_ID_HEADER: &str = "messageId";

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Delivery to {destination} failed: {reason}")]
    DeliveryFailed { destination: String, reason: String },
    #[error("Subscription to {destination} failed: {reason}")]
    Subscribe { destination: String, reason: String },
    #[error("Consumer error: {0}")]
    Consume(String),
    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Where a delivered message came from, needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTag {
    Kafka { partition: i32, offset: i64 },
    Memory(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub id: String,
    pub destination: String,
    pub headers: Headers,
    pub payload: Vec<u8>,
    pub delivery: DeliveryTag,
}

impl BrokerMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn type_id(&self) -> Option<&str> {
        self.header(TYPE_HEADER)
    }

    /// Deserializes the payload as `T`, rejecting messages whose type
    /// discriminator names a different contract.
    pub fn decode<T: QueueMessage>(&self) -> Result<T, BrokerError> {
        if let Some(type_id) = self.type_id() {
            if type_id != T::TYPE_ID {
                return Err(BrokerError::Deserialization(format!(
                    "expected {} on {}, got {}",
                    T::TYPE_ID,
                    self.destination,
                    type_id
                )));
            }
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| BrokerError::Deserialization(e.to_string()))
    }
}

/// A payload type bound to the queue it travels on.
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync {
    const DESTINATION: &'static str;
    const TYPE_ID: &'static str;
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Establishes the session. Never fails: an unreachable broker leaves
    /// the transport `Disconnected` and the next publish retries once.
    async fn connect(&self) -> ConnectionState;

    fn state(&self) -> ConnectionState;

    /// Transmits a serialized payload and returns its message id. The id is
    /// taken from the `messageId` header when the caller supplied one.
    async fn publish_raw(
        &self,
        destination: &str,
        type_id: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<String, BrokerError>;

    async fn subscribe(
        &self,
        destination: &str,
        selector: Option<Selector>,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    fn destination(&self) -> &str;

    /// Next delivered message, or `None` once the subscription is closed.
    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Marks the message as consumed so it is not redelivered.
    async fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

/// Serializes `message` to JSON and publishes it on its queue.
pub async fn publish_message<T: QueueMessage>(
    broker: &dyn MessageBroker,
    message: &T,
    headers: Headers,
) -> Result<String, BrokerError> {
    let payload =
        serde_json::to_vec(message).map_err(|e| BrokerError::Serialization(e.to_string()))?;
    broker
        .publish_raw(T::DESTINATION, T::TYPE_ID, payload, headers)
        .await
}

/// Applies a header selector on top of a raw subscription. Messages that do
/// not match are acknowledged and skipped; they belong to another pool,
/// which reads the queue through its own consumer group.
pub struct FilteredSubscription {
    inner: Box<dyn Subscription>,
    selector: Selector,
    metrics: Arc<PipelineMetrics>,
}

impl FilteredSubscription {
    pub fn new(
        inner: Box<dyn Subscription>,
        selector: Selector,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            inner,
            selector,
            metrics,
        }
    }

    pub fn wrap(
        inner: Box<dyn Subscription>,
        selector: Option<Selector>,
        metrics: Arc<PipelineMetrics>,
    ) -> Box<dyn Subscription> {
        match selector {
            Some(selector) => Box::new(Self::new(inner, selector, metrics)),
            None => inner,
        }
    }
}

#[async_trait]
impl Subscription for FilteredSubscription {
    fn destination(&self) -> &str {
        self.inner.destination()
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        loop {
            let Some(message) = self.inner.next_message().await? else {
                return Ok(None);
            };
            if self.selector.matches(&message.headers) {
                return Ok(Some(message));
            }
            debug!(
                "Skipping message {} on {}: selector [{}] does not match",
                message.id,
                message.destination,
                self.selector
            );
            PipelineMetrics::incr(&self.metrics.messages_filtered);
            if let Err(e) = self.inner.acknowledge(&message).await {
                warn!("Failed to acknowledge filtered message {}: {}", message.id, e);
            }
        }
    }

    async fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.inner.acknowledge(message).await
    }
}
