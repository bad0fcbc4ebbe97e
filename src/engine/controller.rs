//! Synchronization controller.
//!
//! Scans the catalog surface, resolves bulk prices (cache first, one batched
//! request for the misses), rebuilds one overlay per entry, recomputes the
//! good-deal marker, and hands every entity either to an immediate overlay
//! refresh (detailed price known) or to the fetch scheduler.
//!
//! Scans are single-flight. A scan requested while another runs is dropped;
//! the next change signal after completion triggers a fresh full rescan.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::registry::OverlayRegistry;
use super::scheduler::FetchScheduler;
use crate::platforms::PriceSource;
use crate::storage::ValueCache;
use crate::strategy::ProfitCalculator;
use crate::surface::{CatalogEntry, CatalogSurface, OverlayHandle, OverlayView, SurfaceEvent};
use crate::types::EntityId;

/// Result of one `process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was running.
    Skipped,
    /// No entry carried an entity id, even after the retry delay.
    NoEntries,
    Synced(ScanSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub entries: usize,
    pub entities: usize,
    pub overlays: usize,
    pub refreshed: usize,
    pub queued: usize,
}

/// Clears the in-progress flag on every exit path.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SynchronizationController {
    cache: Arc<ValueCache>,
    registry: Arc<OverlayRegistry>,
    scheduler: Arc<FetchScheduler>,
    source: Arc<dyn PriceSource>,
    profit: ProfitCalculator,
    retry_delay: Duration,
    scanning: AtomicBool,
}

impl SynchronizationController {
    pub fn new(
        cache: Arc<ValueCache>,
        registry: Arc<OverlayRegistry>,
        scheduler: Arc<FetchScheduler>,
        source: Arc<dyn PriceSource>,
        profit: ProfitCalculator,
        retry_delay: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            scheduler,
            source,
            profit,
            retry_delay,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Run one full scan of `surface`.
    pub async fn process(&self, surface: &dyn CatalogSurface) -> ScanOutcome {
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            debug!("Scan already in progress, dropping request");
            return ScanOutcome::Skipped;
        };

        let mut entries = identified_entries(surface);
        if entries.is_empty() {
            // The surface may still be settling into its final state.
            tokio::time::sleep(self.retry_delay).await;
            entries = identified_entries(surface);
        }
        if entries.is_empty() {
            debug!("No identifiable entries on the surface");
            return ScanOutcome::NoEntries;
        }

        let mut seen = HashSet::new();
        let ids: Vec<EntityId> = entries
            .iter()
            .filter(|(_, id)| seen.insert(id.clone()))
            .map(|(_, id)| id.clone())
            .collect();

        let prices = self.resolve_bulk(&ids).await;

        let mut summary = ScanSummary {
            entries: entries.len(),
            entities: ids.len(),
            ..ScanSummary::default()
        };

        for (entry, id) in &entries {
            if self.process_entry(entry, id, &prices) {
                summary.overlays += 1;
            }
        }

        for id in &ids {
            if self.cache.has_detailed(id) {
                self.refresh_overlays(id);
                summary.refreshed += 1;
            } else if self.scheduler.enqueue(id.clone()) {
                summary.queued += 1;
            }
        }

        info!(
            entries = summary.entries,
            entities = summary.entities,
            overlays = summary.overlays,
            refreshed = summary.refreshed,
            queued = summary.queued,
            "Surface synchronized"
        );

        ScanOutcome::Synced(summary)
    }

    /// Bulk prices for `ids`: cached records first, one request for the rest.
    pub async fn resolve_bulk(&self, ids: &[EntityId]) -> HashMap<EntityId, u64> {
        let mut prices = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();

        for id in ids {
            match self.cache.get_bulk(id) {
                Some(record) => {
                    prices.insert(id.clone(), record.price);
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            let quotes = self.source.fetch_bulk_prices(&misses).await;
            debug!(requested = misses.len(), received = quotes.len(), "Bulk prices fetched");

            for quote in quotes {
                self.cache.set_bulk(quote.entity_id.clone(), quote.price);
                prices.insert(quote.entity_id, quote.price);
            }
        }

        prices
    }

    /// Rebuild the overlay of one entry. Returns whether one was attached.
    fn process_entry(
        &self,
        entry: &Arc<dyn CatalogEntry>,
        id: &EntityId,
        prices: &HashMap<EntityId, u64>,
    ) -> bool {
        let Some(slot) = entry.overlay_slot() else {
            return false;
        };

        if let Some(previous) = slot.current() {
            self.registry.unregister(&previous);
            slot.clear();
        }
        entry.set_good_deal(false);

        let price = match prices.get(id) {
            Some(&price) if price > 0 => price,
            _ => return false,
        };

        let average = self
            .cache
            .get_detailed(id)
            .and_then(|d| d.average_sale_price)
            .filter(|&avg| avg > 0);
        let overlay = OverlayHandle::new(
            id.clone(),
            OverlayView { price, average },
            Arc::downgrade(entry),
        );

        self.registry.register(id.clone(), overlay.clone());
        slot.attach(overlay);
        self.update_good_deal(entry.as_ref());
        true
    }

    /// Recompute the good-deal marker of `entry` from what is cached.
    pub fn update_good_deal(&self, entry: &dyn CatalogEntry) {
        entry.set_good_deal(false);

        let Some(id) = entry.entity_id() else {
            return;
        };

        if self.profit.is_good_deal(entry.listing_price(), self.comparison_price(&id)) {
            entry.set_good_deal(true);
        }
    }

    /// Price a listing of `id` is judged against: the positive average sale
    /// price when known, the cached bulk price otherwise.
    pub fn comparison_price(&self, id: &EntityId) -> Option<u64> {
        self.cache
            .get_detailed(id)
            .and_then(|d| d.average_sale_price)
            .filter(|&avg| avg > 0)
            .or_else(|| self.cache.get_bulk(id).map(|b| b.price))
    }

    /// Push cached prices into every live overlay of `id`.
    pub fn refresh_overlays(&self, id: &EntityId) {
        self.registry.prune_disconnected(id);

        let Some(overlays) = self.registry.overlays(id) else {
            return;
        };

        let bulk = self.cache.get_bulk(id).map(|b| b.price).filter(|&p| p > 0);
        let average = self
            .cache
            .get_detailed(id)
            .and_then(|d| d.average_sale_price)
            .filter(|&avg| avg > 0);

        for overlay in overlays {
            let mut view = overlay.view();
            if let Some(price) = bulk {
                view.price = price;
            }
            view.average = average;
            overlay.set_view(view);

            if let Some(owner) = overlay.owner() {
                self.update_good_deal(owner.as_ref());
            }
        }
    }
}

/// Entries that carry an entity id, in display order.
fn identified_entries(surface: &dyn CatalogSurface) -> Vec<(Arc<dyn CatalogEntry>, EntityId)> {
    surface
        .entries()
        .into_iter()
        .filter_map(|entry| entry.entity_id().map(|id| (entry, id)))
        .collect()
}

/// Rescan on every surface change signal until the channel closes.
///
/// Each signal spawns its own scan; bursts collapse on the in-progress guard.
/// Scans are owned by the listener and aborted with it.
pub async fn run_listener(
    controller: Arc<SynchronizationController>,
    surface: Arc<dyn CatalogSurface>,
    mut events: broadcast::Receiver<SurfaceEvent>,
) {
    let mut scans = JoinSet::new();

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            Some(_) = scans.join_next(), if !scans.is_empty() => continue,
        };

        match event {
            Ok(SurfaceEvent::ContainerChanged) => {}
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Surface listener lagged");
            }
            Err(RecvError::Closed) => {
                warn!("Surface change channel closed, listener stopping");
                while scans.join_next().await.is_some() {}
                return;
            }
        }

        let controller = controller.clone();
        let surface = surface.clone();
        scans.spawn(async move {
            controller.process(surface.as_ref()).await;
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
