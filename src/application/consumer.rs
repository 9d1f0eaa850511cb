use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{ErrorClass, PipelineError};
use crate::infrastructure::broker::{BrokerMessage, QueueMessage, Subscription};
use crate::infrastructure::metrics::PipelineMetrics;

const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Per-queue business logic driven by [`run_consumer`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError>;
}

/// Decodes a delivered payload; a payload that does not fit its contract
/// is a data error.
pub fn decode_payload<T: QueueMessage>(message: &BrokerMessage) -> Result<T, PipelineError> {
    message
        .decode::<T>()
        .map_err(|e| PipelineError::Malformed(e.to_string()))
}

/// Pulls messages one at a time and hands each to `handler`. Every
/// delivered message is acknowledged after handling whatever the outcome,
/// so a failure is logged and never redelivered by the broker.
pub async fn run_consumer(
    mut subscription: Box<dyn Subscription>,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<PipelineMetrics>,
    shutdown: CancellationToken,
) {
    info!(
        "Consumer {} started on {}",
        handler.name(),
        subscription.destination()
    );

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Consumer {} received shutdown signal. Exiting.", handler.name());
                break;
            }
            next = subscription.next_message() => next,
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Subscription for {} closed", handler.name());
                break;
            }
            Err(e) => {
                error!("Consumer {} failed to receive: {}", handler.name(), e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(CONSUME_ERROR_BACKOFF) => continue,
                }
            }
        };

        let started = Instant::now();
        match handler.handle(&message).await {
            Ok(()) => {
                debug!("{} handled message {}", handler.name(), message.id);
                PipelineMetrics::incr(&metrics.messages_handled);
            }
            Err(e) => {
                PipelineMetrics::incr(&metrics.handler_errors);
                match e.class() {
                    ErrorClass::Data => {
                        PipelineMetrics::incr(&metrics.data_errors);
                        warn!(
                            "{} dropped message {}: {}",
                            handler.name(),
                            message.id,
                            e
                        );
                    }
                    ErrorClass::Transient => {
                        error!(
                            "{} failed on message {}: {}",
                            handler.name(),
                            message.id,
                            e
                        );
                    }
                }
            }
        }
        metrics.record_handling_latency(started.elapsed());

        if let Err(e) = subscription.acknowledge(&message).await {
            PipelineMetrics::incr(&metrics.ack_failures);
            warn!("Failed to acknowledge message {}: {}", message.id, e);
        }
    }
}

pub fn spawn_consumer(
    subscription: Box<dyn Subscription>,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<PipelineMetrics>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_consumer(subscription, handler, metrics, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::{publish_message, MessageBroker};
    use crate::infrastructure::in_memory_broker::InMemoryBroker;
    use crate::domain::ClickEvent;
    use std::sync::Mutex;

    struct FailingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
            self.seen.lock().unwrap().push(message.id.clone());
            Err(PipelineError::not_found("campaign", 1))
        }
    }

    #[tokio::test]
    async fn test_failed_messages_are_still_acknowledged() {
        let metrics = Arc::new(PipelineMetrics::default());
        let broker = InMemoryBroker::new(metrics.clone());
        let event = ClickEvent {
            ip: "1.1.1.1".to_string(),
            referral_hash: None,
            campaign_id: None,
        };
        let id = publish_message(&broker, &event, Default::default())
            .await
            .unwrap();

        let subscription = broker
            .subscribe(crate::infrastructure::destinations::GEO_PROCESSING, None)
            .await
            .unwrap();
        let handler = Arc::new(FailingHandler {
            seen: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();
        let task = spawn_consumer(subscription, handler.clone(), metrics.clone(), shutdown.clone());

        for _ in 0..100 {
            if !broker.acknowledged().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(handler.seen.lock().unwrap().clone(), vec![id.clone()]);
        assert_eq!(broker.acknowledged(), vec![id]);
        assert_eq!(PipelineMetrics::get(&metrics.data_errors), 1);
    }
}
