use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::infrastructure::broker::{
    BrokerError, BrokerMessage, ConnectionState, DeliveryTag, FilteredSubscription, Headers,
    MessageBroker, Subscription, MESSAGE_ID_HEADER, TYPE_HEADER,
};
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::selector::Selector;

#[derive(Default)]
struct Queue {
    subscribers: Vec<mpsc::UnboundedSender<BrokerMessage>>,
    backlog: VecDeque<BrokerMessage>,
}

/// Process-local broker with the same contract as the Kafka transport:
/// every subscription on a destination receives every message (selectors
/// filter), and messages published before anyone subscribed are handed to
/// the first subscriber. Used by single-process deployments and tests.
pub struct InMemoryBroker {
    queues: DashMap<String, Queue>,
    published: Mutex<Vec<BrokerMessage>>,
    acknowledged: Arc<Mutex<Vec<String>>>,
    available: AtomicBool,
    sequence: AtomicU64,
    metrics: Arc<PipelineMetrics>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Arc::new(PipelineMetrics::default()))
    }
}

impl InMemoryBroker {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            queues: DashMap::new(),
            published: Mutex::new(Vec::new()),
            acknowledged: Arc::new(Mutex::new(Vec::new())),
            available: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            metrics,
        }
    }

    /// Simulates the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every message accepted on `destination`, in publish order.
    pub fn published(&self, destination: &str) -> Vec<BrokerMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivers `message` again with the same id, as an at-least-once broker
    /// may after a consumer crash.
    pub fn redeliver(&self, message: &BrokerMessage) {
        let mut copy = message.clone();
        copy.delivery = DeliveryTag::Memory(self.sequence.fetch_add(1, Ordering::SeqCst));
        self.route(copy);
    }

    fn route(&self, message: BrokerMessage) {
        let mut queue = self.queues.entry(message.destination.clone()).or_default();
        queue.subscribers.retain(|tx| !tx.is_closed());
        if queue.subscribers.is_empty() {
            queue.backlog.push_back(message);
            return;
        }
        for tx in &queue.subscribers {
            let _ = tx.send(message.clone());
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn connect(&self) -> ConnectionState {
        self.state()
    }

    fn state(&self) -> ConnectionState {
        if self.available.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn publish_raw(
        &self,
        destination: &str,
        type_id: &str,
        payload: Vec<u8>,
        mut headers: Headers,
    ) -> Result<String, BrokerError> {
        // The single reconnect attempt amounts to re-reading availability.
        if self.connect().await == ConnectionState::Disconnected {
            PipelineMetrics::incr(&self.metrics.reconnect_attempts);
            if self.connect().await == ConnectionState::Disconnected {
                PipelineMetrics::incr(&self.metrics.publish_failures);
                return Err(BrokerError::DeliveryFailed {
                    destination: destination.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }
        }

        let message_id = headers
            .get(MESSAGE_ID_HEADER)
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        headers.insert(MESSAGE_ID_HEADER.to_string(), message_id.clone());
        headers.insert(TYPE_HEADER.to_string(), type_id.to_string());

        let message = BrokerMessage {
            id: message_id.clone(),
            destination: destination.to_string(),
            headers,
            payload,
            delivery: DeliveryTag::Memory(self.sequence.fetch_add(1, Ordering::SeqCst)),
        };
        debug!("InMemoryBroker: publish {} to {}", message.id, destination);

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        self.route(message);
        PipelineMetrics::incr(&self.metrics.messages_published);
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        destination: &str,
        selector: Option<Selector>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut queue = self.queues.entry(destination.to_string()).or_default();
            for message in queue.backlog.drain(..) {
                let _ = tx.send(message);
            }
            queue.subscribers.push(tx);
        }

        let subscription = InMemorySubscription {
            destination: destination.to_string(),
            rx,
            acknowledged: self.acknowledged.clone(),
            metrics: self.metrics.clone(),
        };
        Ok(FilteredSubscription::wrap(
            Box::new(subscription),
            selector,
            self.metrics.clone(),
        ))
    }
}

pub struct InMemorySubscription {
    destination: String,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
    acknowledged: Arc<Mutex<Vec<String>>>,
    metrics: Arc<PipelineMetrics>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        let message = self.rx.recv().await;
        if message.is_some() {
            PipelineMetrics::incr(&self.metrics.messages_consumed);
        }
        Ok(message)
    }

    async fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.id.clone());
        Ok(())
    }
}
