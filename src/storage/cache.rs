//! Two-tier value cache.
//!
//! - Bulk tier: current listing prices, evicted once `now - fetched_at >= ttl`.
//!   Expiry is checked lazily on read and by a periodic sweep.
//! - Detailed tier: representative sale prices, never evicted, persisted in
//!   full on every write.
//!
//! The tiers are independent: an entity can be in either, both or neither.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{load_detailed, save_detailed, DetailedTier};
use crate::types::{BulkPrice, DetailedPrice, EntityId};

pub struct ValueCache {
    ttl: chrono::Duration,
    bulk: Mutex<HashMap<EntityId, BulkPrice>>,
    detailed: Mutex<DetailedTier>,
    /// Durable slot. `None` keeps the detailed tier in memory only.
    slot: Option<PathBuf>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ValueCache {
    /// Build the cache, restoring the detailed tier from `slot`.
    ///
    /// A missing, unreadable or malformed slot yields an empty tier.
    pub fn new(ttl: Duration, slot: Option<PathBuf>) -> Self {
        let detailed = match slot.as_deref().map(load_detailed) {
            Some(Ok(Some(tier))) => tier,
            Some(Ok(None)) | None => DetailedTier::new(),
            Some(Err(e)) => {
                warn!(error = %e, "Failed to load detailed cache, starting empty");
                DetailedTier::new()
            }
        };

        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365_000));
        Self {
            ttl,
            bulk: Mutex::new(HashMap::new()),
            detailed: Mutex::new(detailed),
            slot,
        }
    }

    /// Cache without a durable slot.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(ttl, None)
    }

    // -- Bulk tier -------------------------------------------------------

    pub fn get_bulk(&self, id: &EntityId) -> Option<BulkPrice> {
        self.get_bulk_at(id, Utc::now())
    }

    /// Read a bulk record as of `now`, dropping it if expired.
    pub fn get_bulk_at(&self, id: &EntityId, now: DateTime<Utc>) -> Option<BulkPrice> {
        let mut bulk = lock(&self.bulk);
        let record = bulk.get(id)?;

        if now - record.fetched_at >= self.ttl {
            debug!(entity = %id, "Bulk price expired on read");
            bulk.remove(id);
            return None;
        }

        Some(record.clone())
    }

    pub fn set_bulk(&self, id: EntityId, price: u64) {
        self.set_bulk_at(id, price, Utc::now());
    }

    pub fn set_bulk_at(&self, id: EntityId, price: u64, now: DateTime<Utc>) {
        lock(&self.bulk).insert(
            id,
            BulkPrice {
                price,
                fetched_at: now,
            },
        );
    }

    /// Purge every expired bulk record. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut bulk = lock(&self.bulk);
        let before = bulk.len();
        bulk.retain(|_, record| now - record.fetched_at < self.ttl);
        before - bulk.len()
    }

    pub fn bulk_len(&self) -> usize {
        lock(&self.bulk).len()
    }

    // -- Detailed tier ---------------------------------------------------

    pub fn get_detailed(&self, id: &EntityId) -> Option<DetailedPrice> {
        lock(&self.detailed).get(id).cloned()
    }

    /// Record a representative price and persist the whole tier.
    ///
    /// The tier lock is held through the write, so saves land in the same
    /// order as inserts and the slot always holds every record.
    pub fn set_detailed(&self, id: EntityId, average_sale_price: Option<u64>) {
        let mut detailed = lock(&self.detailed);
        detailed.insert(
            id,
            DetailedPrice {
                average_sale_price,
                fetched_at: Utc::now(),
            },
        );

        if let Some(path) = self.slot.as_deref() {
            if let Err(e) = save_detailed(&detailed, path) {
                warn!(error = %e, "Failed to persist detailed cache, keeping in memory");
            }
        }
    }

    pub fn has_detailed(&self, id: &EntityId) -> bool {
        lock(&self.detailed).contains_key(id)
    }

    /// Snapshot of every entity with a detailed record.
    pub fn all_detailed_ids(&self) -> Vec<EntityId> {
        lock(&self.detailed).keys().cloned().collect()
    }
}

/// Drive the periodic bulk-tier sweep until the task is aborted.
pub async fn run_sweeper(cache: std::sync::Arc<ValueCache>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let dropped = cache.sweep();
        if dropped > 0 {
            info!(dropped, remaining = cache.bulk_len(), "Swept expired bulk prices");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::delete_slot;

    const TTL: Duration = Duration::from_secs(120);

    fn temp_slot() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("fcprices_test_cache_{}.json", uuid::Uuid::new_v4()));
        p
    }

    fn id(s: &str) -> EntityId {
        EntityId::from(s)
    }

    // -- TTL -------------------------------------------------------------

    #[test]
    fn test_bulk_fresh_and_expired_around_boundary() {
        let t0 = Utc::now();
        let ages_ms = [0i64, 1, 60_000, 119_998, 119_999];

        for age in ages_ms {
            let cache = ValueCache::in_memory(TTL);
            cache.set_bulk_at(id("1"), 500, t0);
            let now = t0 + chrono::Duration::milliseconds(age);
            assert!(cache.get_bulk_at(&id("1"), now).is_some(), "age {age}ms should be fresh");
        }

        for age in [120_000i64, 120_001, 500_000] {
            let cache = ValueCache::in_memory(TTL);
            cache.set_bulk_at(id("1"), 500, t0);
            let now = t0 + chrono::Duration::milliseconds(age);
            assert!(cache.get_bulk_at(&id("1"), now).is_none(), "age {age}ms should be expired");
        }
    }

    #[test]
    fn test_expired_read_evicts() {
        let cache = ValueCache::in_memory(TTL);
        let t0 = Utc::now();
        cache.set_bulk_at(id("1"), 500, t0);
        assert_eq!(cache.bulk_len(), 1);

        let _ = cache.get_bulk_at(&id("1"), t0 + chrono::Duration::seconds(121));
        assert_eq!(cache.bulk_len(), 0);
    }

    #[test]
    fn test_sweep_drops_only_expired() {
        let cache = ValueCache::in_memory(TTL);
        let t0 = Utc::now();
        cache.set_bulk_at(id("old"), 1, t0);
        cache.set_bulk_at(id("new"), 2, t0 + chrono::Duration::seconds(100));

        let dropped = cache.sweep_at(t0 + chrono::Duration::seconds(130));
        assert_eq!(dropped, 1);
        assert_eq!(cache.bulk_len(), 1);
        let fresh = cache.get_bulk_at(&id("new"), t0 + chrono::Duration::seconds(130));
        assert_eq!(fresh.map(|r| r.price), Some(2));
    }

    // -- Detailed tier ---------------------------------------------------

    #[test]
    fn test_tiers_are_independent() {
        let cache = ValueCache::in_memory(TTL);
        cache.set_bulk(id("1"), 100);
        cache.set_detailed(id("2"), Some(200));

        assert!(cache.get_bulk(&id("1")).is_some());
        assert!(!cache.has_detailed(&id("1")));
        assert!(cache.get_bulk(&id("2")).is_none());
        assert!(cache.has_detailed(&id("2")));
    }

    #[test]
    fn test_detailed_null_average_is_still_known() {
        let cache = ValueCache::in_memory(TTL);
        cache.set_detailed(id("9"), None);
        assert!(cache.has_detailed(&id("9")));
        assert_eq!(cache.get_detailed(&id("9")).unwrap().average_sale_price, None);
        assert_eq!(cache.all_detailed_ids(), vec![id("9")]);
    }

    #[test]
    fn test_persistence_round_trip() {
        let slot = temp_slot();
        let cache = ValueCache::new(TTL, Some(slot.clone()));
        cache.set_detailed(id("77"), Some(31_000));
        let written = cache.get_detailed(&id("77")).unwrap();
        drop(cache);

        let restarted = ValueCache::new(TTL, Some(slot.clone()));
        assert_eq!(restarted.get_detailed(&id("77")), Some(written));
        assert_eq!(restarted.bulk_len(), 0);

        delete_slot(&slot).unwrap();
    }

    #[test]
    fn test_corrupt_slot_starts_empty() {
        let slot = temp_slot();
        std::fs::write(&slot, "[1, 2, oops").unwrap();

        let cache = ValueCache::new(TTL, Some(slot.clone()));
        assert!(cache.all_detailed_ids().is_empty());

        // Still usable, and the next write repairs the slot.
        cache.set_detailed(id("1"), Some(10));
        let restarted = ValueCache::new(TTL, Some(slot.clone()));
        assert!(restarted.has_detailed(&id("1")));

        delete_slot(&slot).unwrap();
    }

    #[test]
    fn test_unwritable_slot_keeps_memory_copy() {
        let slot = PathBuf::from("/nonexistent-dir-fcprices/slot.json");
        let cache = ValueCache::new(TTL, Some(slot));
        cache.set_detailed(id("5"), Some(50));
        assert_eq!(cache.get_detailed(&id("5")).unwrap().average_sale_price, Some(50));
    }

    #[test]
    fn test_concurrent_writers_persist_every_record() {
        let slot = temp_slot();
        let cache = std::sync::Arc::new(ValueCache::new(TTL, Some(slot.clone())));

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.set_detailed(id(&format!("{t}-{i}")), Some(i));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(cache.all_detailed_ids().len(), 400);
        let restarted = ValueCache::new(TTL, Some(slot.clone()));
        assert_eq!(restarted.all_detailed_ids(), cache.all_detailed_ids());

        delete_slot(&slot).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_purges_without_reads() {
        let cache = std::sync::Arc::new(ValueCache::in_memory(Duration::from_millis(0)));
        cache.set_bulk(id("1"), 1);
        let task = tokio::spawn(run_sweeper(cache.clone(), Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.bulk_len(), 0);
        task.abort();
    }
}
