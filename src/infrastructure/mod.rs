pub mod broker;
pub mod click_aggregator;
pub mod config;
pub mod contracts;
pub mod external_sink;
pub mod geo_lookup;
pub mod idempotency;
pub mod in_memory_broker;
pub mod kafka_broker;
pub mod logging;
pub mod memory_store;
pub mod metrics;
pub mod postgres_store;
pub mod repository;
pub mod selector;

pub use broker::{
    destinations, publish_message, BrokerError, BrokerMessage, ConnectionState, Headers,
    MessageBroker, QueueMessage, Subscription, MESSAGE_ID_HEADER, TYPE_HEADER,
};
pub use click_aggregator::ClickAggregator;
pub use config::{AppConfig, BrokerKind, ConfigError, DashboardWorkerMode, StorageConfig};
pub use external_sink::{ExternalSink, HttpExternalSink, SinkError, SinkParams, SinkValue};
pub use geo_lookup::{GeoLookup, GeoLookupError, HttpGeoLookup};
pub use idempotency::IdempotencyGuard;
pub use in_memory_broker::InMemoryBroker;
pub use kafka_broker::{KafkaBroker, KafkaConfig};
pub use memory_store::InMemoryStore;
pub use metrics::PipelineMetrics;
pub use postgres_store::PostgresStore;
pub use repository::{
    AnalyticsRepository, CampaignRepository, CampaignTransaction, ClickRepository,
    DashboardRepository, NotificationRepository, StorageError,
};
pub use selector::Selector;
