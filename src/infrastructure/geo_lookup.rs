use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::GeoLocation;

/// Loopback addresses, IPv4 or IPv6, are keyed under this form.
pub const LOOPBACK_CANONICAL: &str = "0:0:0:0:0:0:0:1";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoLookupError {
    #[error("Loopback address {0} cannot be located")]
    Loopback(String),
    #[error("Lookup request failed: {0}")]
    Transport(String),
    #[error("Lookup unsuccessful: {0}")]
    Unsuccessful(String),
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError>;
}

/// Trims `ip` and rewrites any loopback address to [`LOOPBACK_CANONICAL`].
pub fn canonicalize_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) if addr.is_loopback() => LOOPBACK_CANONICAL.to_string(),
        _ => trimmed.to_string(),
    }
}

pub fn is_loopback(ip: &str) -> bool {
    ip == LOOPBACK_CANONICAL || ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

#[derive(Debug, Clone)]
pub struct GeoLookupConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeoLookupConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ip-api.com/json".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
}

/// Client for an ip-api compatible JSON endpoint (`{base_url}/{ip}`).
#[derive(Debug, Clone)]
pub struct HttpGeoLookup {
    client: Client,
    config: GeoLookupConfig,
}

impl HttpGeoLookup {
    pub fn new(config: GeoLookupConfig) -> Result<Self, GeoLookupError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeoLookupError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
        if is_loopback(ip) {
            return Err(GeoLookupError::Loopback(ip.to_string()));
        }

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), ip);
        debug!("Geo lookup: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoLookupError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GeoLookupError::Transport(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| GeoLookupError::Transport(e.to_string()))?;
        if body.status != "success" {
            return Err(GeoLookupError::Unsuccessful(
                body.message.unwrap_or(body.status),
            ));
        }

        let unknown = GeoLocation::unknown();
        Ok(GeoLocation {
            country: body.country.unwrap_or(unknown.country),
            region: body.region_name.unwrap_or(unknown.region),
            city: body.city.unwrap_or(unknown.city),
            latitude: body.lat.unwrap_or(unknown.latitude),
            longitude: body.lon.unwrap_or(unknown.longitude),
            timezone: body.timezone.unwrap_or(unknown.timezone),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_is_canonicalized() {
        assert_eq!(canonicalize_ip("127.0.0.1"), LOOPBACK_CANONICAL);
        assert_eq!(canonicalize_ip(" ::1 "), LOOPBACK_CANONICAL);
        assert_eq!(canonicalize_ip("8.8.8.8"), "8.8.8.8");
        assert_eq!(canonicalize_ip("not-an-ip"), "not-an-ip");
        assert!(is_loopback(LOOPBACK_CANONICAL));
        assert!(!is_loopback("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_loopback_lookup_fails_without_network() {
        let lookup = HttpGeoLookup::new(GeoLookupConfig::default()).unwrap();
        let result = lookup.lookup(LOOPBACK_CANONICAL).await;
        assert!(matches!(result, Err(GeoLookupError::Loopback(_))));
    }
}
