//! Detail fetch → aggregate → persist → overlay refresh.
//!
//! Shared by the scheduler, the background refresh cycle and foreground
//! detail requests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::controller::SynchronizationController;
use crate::platforms::PriceSource;
use crate::storage::ValueCache;
use crate::strategy::PriceAggregator;
use crate::types::{EntityDetails, EntityId};

/// One detail refresh for an entity.
#[async_trait]
pub trait DetailRefresh: Send + Sync {
    async fn refresh(&self, id: &EntityId) -> Result<()>;
}

pub struct DetailUpdater {
    source: Arc<dyn PriceSource>,
    cache: Arc<ValueCache>,
    controller: Arc<SynchronizationController>,
    aggregator: PriceAggregator,
}

impl DetailUpdater {
    pub fn new(
        source: Arc<dyn PriceSource>,
        cache: Arc<ValueCache>,
        controller: Arc<SynchronizationController>,
        aggregator: PriceAggregator,
    ) -> Self {
        Self {
            source,
            cache,
            controller,
            aggregator,
        }
    }

    /// Fetch details for `id`, store the aggregated sale price and refresh
    /// its overlays. Returns the raw details and the new average.
    ///
    /// On fetch failure nothing is written.
    pub async fn update(&self, id: &EntityId) -> Result<(EntityDetails, Option<u64>)> {
        let details = self
            .source
            .fetch_entity_details(id)
            .await
            .with_context(|| format!("Detail update failed for {id}"))?;

        let average = self.aggregator.average_sale_price(&details);
        debug!(
            entity = %id,
            average = ?average,
            sales = details.completed_auctions.len(),
            "Detail fetched"
        );

        self.cache.set_detailed(id.clone(), average);
        self.controller.refresh_overlays(id);

        Ok((details, average))
    }
}

#[async_trait]
impl DetailRefresh for DetailUpdater {
    async fn refresh(&self, id: &EntityId) -> Result<()> {
        self.update(id).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::OverlayRegistry;
    use crate::engine::scheduler::FetchScheduler;
    use crate::platforms::MockPriceSource;
    use crate::strategy::ProfitCalculator;
    use crate::surface::memory::MemoryEntry;
    use crate::surface::{CatalogEntry, OverlayHandle, OverlayView};
    use crate::types::CompletedAuction;
    use std::time::Duration;

    fn sold(prices: &[u64]) -> EntityDetails {
        EntityDetails {
            completed_auctions: prices
                .iter()
                .map(|&p| CompletedAuction {
                    sold_price: Some(p),
                    sold_date: None,
                })
                .collect(),
            ..EntityDetails::default()
        }
    }

    struct Fixture {
        cache: Arc<ValueCache>,
        registry: Arc<OverlayRegistry>,
        updater: DetailUpdater,
    }

    fn fixture(source: MockPriceSource) -> Fixture {
        let source: Arc<dyn PriceSource> = Arc::new(source);
        let cache = Arc::new(ValueCache::in_memory(Duration::from_secs(120)));
        let registry = Arc::new(OverlayRegistry::new());
        let controller = Arc::new(SynchronizationController::new(
            cache.clone(),
            registry.clone(),
            Arc::new(FetchScheduler::new()),
            source.clone(),
            ProfitCalculator::default(),
            Duration::from_millis(500),
        ));
        let updater = DetailUpdater::new(
            source,
            cache.clone(),
            controller,
            PriceAggregator::default(),
        );
        Fixture {
            cache,
            registry,
            updater,
        }
    }

    #[tokio::test]
    async fn test_update_stores_average_and_refreshes_overlay() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_entity_details()
            .times(1)
            .returning(|_| Ok(sold(&[30_000, 30_000, 30_000])));
        let fx = fixture(source);

        let id = EntityId::from("7");
        fx.cache.set_bulk(id.clone(), 15_000);

        let entry: Arc<dyn CatalogEntry> = Arc::new(MemoryEntry::new("7", Some(15_000)));
        let overlay = OverlayHandle::new(
            id.clone(),
            OverlayView {
                price: 15_000,
                average: None,
            },
            Arc::downgrade(&entry),
        );
        entry.overlay_slot().unwrap().attach(overlay.clone());
        fx.registry.register(id.clone(), overlay.clone());

        let (_, average) = fx.updater.update(&id).await.unwrap();

        assert_eq!(average, Some(30_000));
        assert_eq!(fx.cache.get_detailed(&id).unwrap().average_sale_price, Some(30_000));
        assert_eq!(overlay.view().average, Some(30_000));
    }

    #[tokio::test]
    async fn test_update_failure_writes_nothing() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_entity_details()
            .returning(|_| Err(anyhow::anyhow!("malformed")));
        let fx = fixture(source);

        let id = EntityId::from("9");
        let err = fx.updater.refresh(&id).await.unwrap_err();
        assert!(err.to_string().contains("Detail update failed for 9"));
        assert!(!fx.cache.has_detailed(&id));
    }

    #[tokio::test]
    async fn test_no_sales_stores_absent_average() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_entity_details()
            .returning(|_| Ok(EntityDetails::default()));
        let fx = fixture(source);

        let id = EntityId::from("3");
        fx.updater.refresh(&id).await.unwrap();
        assert!(fx.cache.has_detailed(&id));
        assert_eq!(fx.cache.get_detailed(&id).unwrap().average_sale_price, None);
    }
}
