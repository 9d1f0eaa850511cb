pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{CampaignOpsPublisher, NodeDependencies, WorkerNode};
pub use domain::PipelineError;
pub use infrastructure::{AppConfig, InMemoryBroker, InMemoryStore, MessageBroker};
