use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::application::consumer::MessageHandler;
use crate::domain::PipelineError;
use crate::infrastructure::broker::{BrokerMessage, MESSAGE_ID_HEADER};
use crate::infrastructure::idempotency::IdempotencyGuard;
use crate::infrastructure::metrics::PipelineMetrics;

/// Identity used for deduplication: the producer's `messageId` header, or
/// the broker id when the header is missing.
pub fn message_key(message: &BrokerMessage) -> &str {
    message
        .header(MESSAGE_ID_HEADER)
        .unwrap_or(message.id.as_str())
}

/// Drops redeliveries of messages this node has already seen before they
/// reach `inner`. The id is recorded before handling, so a message whose
/// handling failed is not attempted again.
pub struct Deduplicated<H> {
    inner: H,
    guard: Arc<IdempotencyGuard>,
    metrics: Arc<PipelineMetrics>,
}

impl<H: MessageHandler> Deduplicated<H> {
    pub fn new(inner: H, guard: Arc<IdempotencyGuard>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner,
            guard,
            metrics,
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Deduplicated<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let key = message_key(message);
        if !self.guard.first_sighting(key) {
            info!(
                "{}: message {} already processed, dropping duplicate",
                self.inner.name(),
                key
            );
            PipelineMetrics::incr(&self.metrics.duplicates_dropped);
            return Ok(());
        }
        self.inner.handle(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::{DeliveryTag, Headers};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _message: &BrokerMessage) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message(broker_id: &str, message_id: Option<&str>) -> BrokerMessage {
        let mut headers = Headers::new();
        if let Some(id) = message_id {
            headers.insert(MESSAGE_ID_HEADER.to_string(), id.to_string());
        }
        BrokerMessage {
            id: broker_id.to_string(),
            destination: "q".to_string(),
            headers,
            payload: Vec::new(),
            delivery: DeliveryTag::Memory(0),
        }
    }

    #[tokio::test]
    async fn test_replay_reaches_handler_once() {
        let metrics = Arc::new(PipelineMetrics::default());
        let handler = Deduplicated::new(
            Counting::default(),
            Arc::new(IdempotencyGuard::default()),
            metrics.clone(),
        );

        handler.handle(&message("b-1", Some("m-1"))).await.unwrap();
        handler.handle(&message("b-2", Some("m-1"))).await.unwrap();
        handler.handle(&message("b-3", None)).await.unwrap();
        handler.handle(&message("b-3", None)).await.unwrap();

        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(PipelineMetrics::get(&metrics.duplicates_dropped), 2);
    }
}
