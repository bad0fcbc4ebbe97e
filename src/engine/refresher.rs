//! Background revalidation of known detailed prices.
//!
//! Walks the detailed tier round-robin, one entity per tick, only while the
//! scheduler has nothing queued and nothing in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::scheduler::FetchScheduler;
use super::updater::DetailRefresh;
use crate::storage::ValueCache;
use crate::types::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Scheduler had queued or in-flight work.
    Deferred,
    /// Detailed tier is empty.
    NothingCached,
    Refreshed(EntityId),
    Failed(EntityId),
}

pub struct BackgroundRefresher {
    cache: Arc<ValueCache>,
    scheduler: Arc<FetchScheduler>,
    refresh: Arc<dyn DetailRefresh>,
    cursor: Mutex<usize>,
}

impl BackgroundRefresher {
    pub fn new(
        cache: Arc<ValueCache>,
        scheduler: Arc<FetchScheduler>,
        refresh: Arc<dyn DetailRefresh>,
    ) -> Self {
        Self {
            cache,
            scheduler,
            refresh,
            cursor: Mutex::new(0),
        }
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn tick(&self) -> RefreshOutcome {
        if !self.scheduler.is_empty() {
            return RefreshOutcome::Deferred;
        }
        let Some(_busy) = self.scheduler.try_begin() else {
            return RefreshOutcome::Deferred;
        };

        let ids = self.cache.all_detailed_ids();
        let id = {
            let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
            if ids.is_empty() {
                *cursor = 0;
                return RefreshOutcome::NothingCached;
            }
            if *cursor >= ids.len() {
                *cursor = 0;
            }
            let id = ids[*cursor].clone();
            *cursor += 1;
            id
        };

        debug!(entity = %id, known = ids.len(), "Background refresh");
        match self.refresh.refresh(&id).await {
            Ok(()) => RefreshOutcome::Refreshed(id),
            Err(e) => {
                warn!(entity = %id, error = %e, "Background refresh failed");
                RefreshOutcome::Failed(id)
            }
        }
    }
}

/// Drive background refresh ticks until the task is aborted.
pub async fn run_refresher(refresher: Arc<BackgroundRefresher>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        refresher.tick().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
