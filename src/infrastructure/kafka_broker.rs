use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    client::ClientContext,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    message::{BorrowedMessage, Header, Headers as _, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    Message, Offset, TopicPartitionList,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::broker::{
    BrokerError, BrokerMessage, ConnectionState, DeliveryTag, FilteredSubscription, Headers,
    MessageBroker, Subscription, MESSAGE_ID_HEADER, TYPE_HEADER,
};
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::selector::Selector;

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub client_id: String,
    pub producer_acks: String,
    pub message_timeout_ms: u64,
    pub metadata_timeout_ms: u64,
    pub consumer_session_timeout_ms: u32,
    pub consumer_max_poll_interval_ms: u32,
    pub auto_offset_reset: String,
    pub security_protocol: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "campaign-ops".to_string(),
            client_id: "campaign-ops-node".to_string(),
            producer_acks: "all".to_string(),
            message_timeout_ms: 5000,
            metadata_timeout_ms: 3000,
            consumer_session_timeout_ms: 10000,
            consumer_max_poll_interval_ms: 300000,
            auto_offset_reset: "earliest".to_string(),
            security_protocol: "PLAINTEXT".to_string(),
        }
    }
}

impl KafkaConfig {
    /// Consumer group for one subscription. Selector-filtered pools get a
    /// group of their own so every pool sees the whole queue.
    pub fn group_for(&self, destination: &str, selector: Option<&Selector>) -> String {
        match selector {
            Some(selector) => format!("{}.{}.{}", self.group_id, destination, selector.slug()),
            None => format!("{}.{}", self.group_id, destination),
        }
    }
}

/// Kafka-backed transport. The producer is created lazily and replaced on
/// failure; a publish performs at most one reconnect before giving up.
pub struct KafkaBroker {
    config: KafkaConfig,
    producer: RwLock<Option<FutureProducer>>,
    connected: AtomicBool,
    metrics: Arc<PipelineMetrics>,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            config,
            producer: RwLock::new(None),
            connected: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    async fn establish(&self) -> Result<FutureProducer, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("client.id", &self.config.client_id)
            .set("acks", &self.config.producer_acks)
            .set("security.protocol", &self.config.security_protocol)
            .set("message.timeout.ms", self.config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        // librdkafka connects lazily; a metadata round trip proves the
        // cluster is reachable.
        let probe = producer.clone();
        let timeout = Duration::from_millis(self.config.metadata_timeout_ms);
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(producer)
    }

    async fn reconnect(&self) -> Result<FutureProducer, BrokerError> {
        PipelineMetrics::incr(&self.metrics.reconnect_attempts);
        match self.establish().await {
            Ok(producer) => {
                *self.producer.write().await = Some(producer.clone());
                self.connected.store(true, Ordering::SeqCst);
                info!(
                    "KafkaBroker: connected to {}",
                    self.config.bootstrap_servers
                );
                Ok(producer)
            }
            Err(e) => {
                *self.producer.write().await = None;
                self.connected.store(false, Ordering::SeqCst);
                warn!(
                    "KafkaBroker: unable to reach {}: {}",
                    self.config.bootstrap_servers, e
                );
                Err(e)
            }
        }
    }

    async fn send(
        &self,
        producer: &FutureProducer,
        destination: &str,
        key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), String> {
        let kafka_headers = headers.iter().fold(OwnedHeaders::new(), |acc, (k, v)| {
            acc.insert(Header {
                key: k.as_str(),
                value: Some(v.as_str()),
            })
        });

        producer
            .send(
                FutureRecord::to(destination)
                    .key(key)
                    .payload(payload)
                    .headers(kafka_headers),
                Timeout::After(Duration::from_millis(self.config.message_timeout_ms)),
            )
            .await
            .map(|_| ())
            .map_err(|(e, _)| e.to_string())
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn connect(&self) -> ConnectionState {
        match self.reconnect().await {
            Ok(_) => ConnectionState::Connected,
            Err(_) => ConnectionState::Disconnected,
        }
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
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
        let message_id = headers
            .get(MESSAGE_ID_HEADER)
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        headers.insert(MESSAGE_ID_HEADER.to_string(), message_id.clone());
        headers.insert(TYPE_HEADER.to_string(), type_id.to_string());

        let delivery_failed = |reason: String| {
            PipelineMetrics::incr(&self.metrics.publish_failures);
            BrokerError::DeliveryFailed {
                destination: destination.to_string(),
                reason,
            }
        };

        let current = self.producer.read().await.clone();
        let (producer, reconnected) = match current {
            Some(producer) => (producer, false),
            None => (
                self.reconnect()
                    .await
                    .map_err(|e| delivery_failed(e.to_string()))?,
                true,
            ),
        };

        if let Err(reason) = self
            .send(&producer, destination, &message_id, &payload, &headers)
            .await
        {
            if reconnected {
                error!("KafkaBroker: publish to {} failed: {}", destination, reason);
                return Err(delivery_failed(reason));
            }
            warn!(
                "KafkaBroker: publish to {} failed ({}), reconnecting once",
                destination, reason
            );
            self.connected.store(false, Ordering::SeqCst);
            let producer = self
                .reconnect()
                .await
                .map_err(|e| delivery_failed(e.to_string()))?;
            self.send(&producer, destination, &message_id, &payload, &headers)
                .await
                .map_err(|reason| {
                    error!("KafkaBroker: publish to {} failed after reconnect: {}", destination, reason);
                    delivery_failed(reason)
                })?;
        }

        PipelineMetrics::incr(&self.metrics.messages_published);
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        destination: &str,
        selector: Option<Selector>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let group_id = self.config.group_for(destination, selector.as_ref());
        info!(
            "KafkaBroker: subscribing to {} as group {}{}",
            destination,
            group_id,
            selector
                .as_ref()
                .map(|s| format!(" with selector [{}]", s))
                .unwrap_or_default()
        );

        let consumer: LoggingConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("group.id", &group_id)
            .set("client.id", &self.config.client_id)
            .set("security.protocol", &self.config.security_protocol)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("enable.partition.eof", "false")
            .set("allow.auto.create.topics", "true")
            .set(
                "session.timeout.ms",
                self.config.consumer_session_timeout_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                self.config.consumer_max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky")
            .create_with_context(LoggingConsumerContext)
            .map_err(|e| BrokerError::Subscribe {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;

        consumer
            .subscribe(&[destination])
            .map_err(|e| BrokerError::Subscribe {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;

        let subscription = KafkaSubscription {
            destination: destination.to_string(),
            consumer,
            metrics: self.metrics.clone(),
        };
        Ok(FilteredSubscription::wrap(
            Box::new(subscription),
            selector,
            self.metrics.clone(),
        ))
    }
}

struct LoggingConsumerContext;

impl ClientContext for LoggingConsumerContext {}

impl ConsumerContext for LoggingConsumerContext {
    fn pre_rebalance(
        &self,
        _consumer: &rdkafka::consumer::BaseConsumer<Self>,
        rebalance: &Rebalance,
    ) {
        info!("Pre-rebalance: {:?}", rebalance);
    }

    fn post_rebalance(
        &self,
        _consumer: &rdkafka::consumer::BaseConsumer<Self>,
        rebalance: &Rebalance,
    ) {
        info!("Post-rebalance: {:?}", rebalance);
    }
}

type LoggingConsumer = StreamConsumer<LoggingConsumerContext>;

pub struct KafkaSubscription {
    destination: String,
    consumer: LoggingConsumer,
    metrics: Arc<PipelineMetrics>,
}

fn to_broker_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    let mut headers = Headers::new();
    if let Some(kafka_headers) = message.headers() {
        for header in kafka_headers.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }

    let id = headers.get(MESSAGE_ID_HEADER).cloned().unwrap_or_else(|| {
        format!(
            "{}-{}-{}",
            message.topic(),
            message.partition(),
            message.offset()
        )
    });

    BrokerMessage {
        id,
        destination: message.topic().to_string(),
        headers,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        delivery: DeliveryTag::Kafka {
            partition: message.partition(),
            offset: message.offset(),
        },
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        match self.consumer.recv().await {
            Ok(message) => {
                PipelineMetrics::incr(&self.metrics.messages_consumed);
                Ok(Some(to_broker_message(&message)))
            }
            Err(e) => Err(BrokerError::Consume(e.to_string())),
        }
    }

    async fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let DeliveryTag::Kafka { partition, offset } = message.delivery else {
            return Err(BrokerError::Acknowledge(format!(
                "message {} was not delivered by Kafka",
                message.id
            )));
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&message.destination, partition, Offset::Offset(offset + 1))
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| {
                PipelineMetrics::incr(&self.metrics.ack_failures);
                BrokerError::Acknowledge(e.to_string())
            })
    }
}
