use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";

/// Raw referral click as published by the tracking endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub ip: String,
    pub referral_hash: Option<String>,
    pub campaign_id: Option<i64>,
}

/// Result of a geolocation lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

impl GeoLocation {
    pub fn unknown() -> Self {
        Self {
            country: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timezone: UNKNOWN.to_string(),
        }
    }
}

/// Coalesced clicks from one origin IP between two flushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClickAggregate {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub click_count: u64,
    pub last_seen_at: DateTime<Utc>,
    pub campaign_id: Option<i64>,
    pub referral_hash: Option<String>,
}

impl ClickAggregate {
    /// Builds a single-click record for `event` located at `geo`.
    pub fn from_event(event: &ClickEvent, ip: &str, geo: GeoLocation, seen_at: DateTime<Utc>) -> Self {
        Self {
            ip: ip.to_string(),
            country: geo.country,
            region: geo.region,
            city: geo.city,
            latitude: geo.latitude,
            longitude: geo.longitude,
            timezone: geo.timezone,
            click_count: 1,
            last_seen_at: seen_at,
            campaign_id: event.campaign_id,
            referral_hash: event.referral_hash.clone(),
        }
    }

    pub fn is_unknown_location(&self) -> bool {
        self.country == UNKNOWN
    }
}
