use std::sync::{PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::ClickAggregate;

/// Per-IP click accumulator shared by enrichment workers and the flush
/// timer.
///
/// Upserts run concurrently under the shared side of `live` and rely on the
/// dashmap entry lock for per-key atomicity. `drain_all` takes the exclusive
/// side to swap the map, so an upsert either completes before the swap and
/// is returned by that drain, or starts after it and lands in the fresh map.
#[derive(Default)]
pub struct ClickAggregator {
    live: RwLock<DashMap<String, ClickAggregate>>,
}

impl ClickAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more click from `ip`. A new IP is stored as `record` with a
    /// count of one; an existing one takes `record`'s fields and keeps its
    /// running count plus one. Returns the count after the update.
    pub fn upsert(&self, ip: &str, mut record: ClickAggregate) -> u64 {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        let count = match live.entry(ip.to_string()) {
            Entry::Occupied(mut existing) => {
                record.click_count = existing.get().click_count + 1;
                record.ip = ip.to_string();
                let count = record.click_count;
                existing.insert(record);
                count
            }
            Entry::Vacant(slot) => {
                record.click_count = 1;
                record.ip = ip.to_string();
                slot.insert(record);
                1
            }
        };
        count
    }

    /// Removes and returns every aggregate.
    pub fn drain_all(&self) -> Vec<ClickAggregate> {
        let drained = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *live)
        };
        drained.into_iter().map(|(_, aggregate)| aggregate).collect()
    }

    pub fn len(&self) -> usize {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn click_count(&self, ip: &str) -> Option<u64> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ip)
            .map(|aggregate| aggregate.click_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClickEvent, GeoLocation};
    use chrono::{Duration, Utc};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn record(ip: &str, city: &str, offset_secs: i64) -> ClickAggregate {
        let event = ClickEvent {
            ip: ip.to_string(),
            referral_hash: Some(format!("ref-{}", city)),
            campaign_id: Some(3),
        };
        let mut geo = GeoLocation::unknown();
        geo.city = city.to_string();
        ClickAggregate::from_event(&event, ip, geo, Utc::now() + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_repeated_upserts_sum_counts_and_keep_last_fields() {
        let aggregator = ClickAggregator::new();
        let cities = ["Oslo", "Bergen", "Tromso", "Bodo"];
        let mut last = None;
        for (i, city) in cities.iter().enumerate() {
            let r = record("10.0.0.1", city, i as i64);
            last = Some(r.clone());
            aggregator.upsert("10.0.0.1", r);
        }

        let drained = aggregator.drain_all();
        assert_eq!(drained.len(), 1);
        let aggregate = &drained[0];
        let last = last.unwrap();
        assert_eq!(aggregate.click_count, cities.len() as u64);
        assert_eq!(aggregate.city, "Bodo");
        assert_eq!(aggregate.referral_hash, last.referral_hash);
        assert_eq!(aggregate.last_seen_at, last.last_seen_at);
    }

    #[test]
    fn test_drain_empties_the_map() {
        let aggregator = ClickAggregator::new();
        aggregator.upsert("10.0.0.1", record("10.0.0.1", "A", 0));
        aggregator.upsert("10.0.0.2", record("10.0.0.2", "B", 0));

        let drained = aggregator.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(aggregator.len(), 0);
        for aggregate in drained {
            assert_eq!(aggregator.click_count(&aggregate.ip), None);
        }
        assert!(aggregator.drain_all().is_empty());
    }

    #[test]
    fn test_upsert_ignores_incoming_count() {
        let aggregator = ClickAggregator::new();
        let mut r = record("10.0.0.9", "A", 0);
        r.click_count = 40;
        assert_eq!(aggregator.upsert("10.0.0.9", r), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_ips() {
        let aggregator = Arc::new(ClickAggregator::new());
        let mut handles = Vec::new();
        for i in 0..500 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                let ip = format!("10.1.{}.{}", i / 256, i % 256);
                aggregator.upsert(&ip, record(&ip, "X", 0));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let drained = aggregator.drain_all();
        assert_eq!(drained.len(), 500);
        assert!(drained.iter().all(|a| a.click_count == 1));
        let unique: HashSet<_> = drained.iter().map(|a| a.ip.clone()).collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn test_no_click_lost_while_draining() {
        let aggregator = Arc::new(ClickAggregator::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let ip = format!("192.168.0.{}", w);
                        aggregator.upsert(&ip, record(&ip, "Y", 0));
                    }
                })
            })
            .collect();

        let mut total = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            total += aggregator
                .drain_all()
                .iter()
                .map(|a| a.click_count)
                .sum::<u64>();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        total += aggregator
            .drain_all()
            .iter()
            .map(|a| a.click_count)
            .sum::<u64>();

        assert_eq!(total, 8_000);
    }
}
