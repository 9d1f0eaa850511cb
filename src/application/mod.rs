pub mod billing_worker;
pub mod budget_optimizer;
pub mod campaign_service;
pub mod consumer;
pub mod dashboard;
pub mod enrichment_worker;
pub mod node;
pub mod notification_fanout;
pub mod publisher;
pub mod scheduler;
pub mod side_effects;

pub use billing_worker::BillingWorker;
pub use budget_optimizer::BudgetOptimizer;
pub use campaign_service::CampaignService;
pub use consumer::{run_consumer, MessageHandler};
pub use enrichment_worker::EnrichmentWorker;
pub use node::{NodeDependencies, Storage, WorkerNode};
pub use notification_fanout::NotificationFanout;
pub use publisher::CampaignOpsPublisher;
