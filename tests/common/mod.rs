#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;

use campaign_ops::domain::{Campaign, GeoLocation, PerformanceMetrics};
use campaign_ops::infrastructure::external_sink::{ExternalSink, SinkError, SinkParams};
use campaign_ops::infrastructure::geo_lookup::{GeoLookup, GeoLookupError};

mock! {
    pub Geo {}

    #[async_trait]
    impl GeoLookup for Geo {
        async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError>;
    }
}

/// Sink that records every call and optionally fails them all.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(String, SinkParams)>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        *sink.failing.lock().unwrap() = true;
        sink
    }

    pub fn calls(&self) -> Vec<(String, SinkParams)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }
}

#[async_trait]
impl ExternalSink for RecordingSink {
    async fn call(&self, method: &str, params: SinkParams) -> Result<String, SinkError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if *self.failing.lock().unwrap() {
            return Err(SinkError::Transport {
                method: method.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok("{\"result\":true}".to_string())
    }
}

pub fn campaign(id: i64, budget: Option<Decimal>, metrics: Option<PerformanceMetrics>) -> Campaign {
    Campaign {
        id,
        name: format!("Campaign {}", id),
        budget,
        active: true,
        owner: None,
        metrics,
        updated_at: Utc::now(),
    }
}

pub fn metrics(clicks: u64, conversion: Decimal, ctr: Decimal, roi: Option<Decimal>) -> PerformanceMetrics {
    PerformanceMetrics {
        click_count: clicks,
        impressions: clicks * 10,
        conversion_rate: Some(conversion),
        ctr: Some(ctr),
        roi,
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
