use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink transport error calling {method}: {reason}")]
    Transport { method: String, reason: String },
    #[error("Sink rejected {method} with status {status}")]
    Rejected { method: String, status: u16 },
    #[error("Sink configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<String> for SinkValue {
    fn from(value: String) -> Self {
        SinkValue::Text(value)
    }
}

impl From<&str> for SinkValue {
    fn from(value: &str) -> Self {
        SinkValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for SinkValue {
    fn from(value: Vec<u8>) -> Self {
        SinkValue::Bytes(value)
    }
}

pub type SinkParams = BTreeMap<String, SinkValue>;

/// Builds a [`SinkParams`] map from `key => value` pairs.
#[macro_export]
macro_rules! sink_params {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut params = $crate::infrastructure::external_sink::SinkParams::new();
        $(params.insert($key.to_string(), $crate::infrastructure::external_sink::SinkValue::from($value));)*
        params
    }};
}

/// The CRM, reached by method name plus parameters.
#[async_trait]
pub trait ExternalSink: Send + Sync {
    async fn call(&self, method: &str, params: SinkParams) -> Result<String, SinkError>;
}

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Webhook root, e.g. `https://crm.example.com/rest/1/token`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/rest".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// POSTs `{base_url}/{method}.json` with a JSON body. Binary parameters are
/// sent base64-encoded.
#[derive(Debug, Clone)]
pub struct HttpExternalSink {
    client: Client,
    config: HttpSinkConfig,
}

impl HttpExternalSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }
}

pub fn encode_params(params: &SinkParams) -> Value {
    let body: Map<String, Value> = params
        .iter()
        .map(|(key, value)| {
            let encoded = match value {
                SinkValue::Text(text) => Value::String(text.clone()),
                SinkValue::Bytes(bytes) => Value::String(BASE64_STANDARD.encode(bytes)),
            };
            (key.clone(), encoded)
        })
        .collect();
    Value::Object(body)
}

#[async_trait]
impl ExternalSink for HttpExternalSink {
    async fn call(&self, method: &str, params: SinkParams) -> Result<String, SinkError> {
        let url = format!("{}/{}.json", self.config.base_url.trim_end_matches('/'), method);
        debug!("Sink call {} ({} params)", method, params.len());

        let response = self
            .client
            .post(&url)
            .json(&encode_params(&params))
            .send()
            .await
            .map_err(|e| SinkError::Transport {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| SinkError::Transport {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_are_base64_encoded() {
        let params = sink_params! {
            "title" => "Weekly",
            "chart" => vec![1u8, 2, 3],
        };
        let body = encode_params(&params);
        assert_eq!(body["title"], "Weekly");
        assert_eq!(body["chart"], "AQID");
    }
}
