//! Price sync engine.
//!
//! `Engine` is the assembly root: it builds every component once, shares
//! them through `Arc`, and starts the background tasks that keep the
//! catalog surface annotated.
//!
//! ```text
//!   surface change ─▶ controller ──▶ cache (bulk) ─▶ overlays
//!                         │
//!                         └─▶ scheduler ─▶ updater ─▶ cache (detailed) ─▶ overlays
//!                                ▲
//!              refresher ────────┘ (shares the in-flight guard)
//! ```

pub mod controller;
pub mod refresher;
pub mod registry;
pub mod scheduler;
pub mod updater;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::platforms::PriceSource;
use crate::report::DetailReport;
use crate::storage::cache::run_sweeper;
use crate::storage::ValueCache;
use crate::strategy::{AggregatorConfig, PriceAggregator, ProfitCalculator, ProfitConfig};
use crate::surface::{CatalogSurface, Notifier};
use crate::types::EntityId;

use controller::{run_listener, ScanOutcome, SynchronizationController};
use refresher::{run_refresher, BackgroundRefresher};
use registry::OverlayRegistry;
use scheduler::{run_scheduler, FetchScheduler};
use updater::{DetailRefresh, DetailUpdater};

/// Shown when a user-triggered detail request fails.
pub const DETAIL_FAILURE_NOTICE: &str = "Failed to load player details. Please try again.";

pub struct Engine {
    cache: Arc<ValueCache>,
    registry: Arc<OverlayRegistry>,
    scheduler: Arc<FetchScheduler>,
    controller: Arc<SynchronizationController>,
    updater: Arc<DetailUpdater>,
    refresher: Arc<BackgroundRefresher>,
    notifier: Arc<dyn Notifier>,
    profit: ProfitCalculator,
    tick_interval: Duration,
    refresh_interval: Duration,
    sweep_interval: Duration,
}

impl Engine {
    pub fn new(cfg: &AppConfig, source: Arc<dyn PriceSource>, notifier: Arc<dyn Notifier>) -> Self {
        let cache = Arc::new(ValueCache::new(cfg.cache.bulk_ttl(), cfg.cache.storage_path()));
        Self::with_cache(cfg, cache, source, notifier)
    }

    /// Build around an existing cache (used to share one across restarts in tests).
    pub fn with_cache(
        cfg: &AppConfig,
        cache: Arc<ValueCache>,
        source: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let profit = ProfitCalculator::new(ProfitConfig::from(&cfg.pricing));
        let registry = Arc::new(OverlayRegistry::new());
        let scheduler = Arc::new(FetchScheduler::new());

        let controller = Arc::new(SynchronizationController::new(
            cache.clone(),
            registry.clone(),
            scheduler.clone(),
            source.clone(),
            profit.clone(),
            cfg.scheduler.scan_retry_delay(),
        ));

        let updater = Arc::new(DetailUpdater::new(
            source,
            cache.clone(),
            controller.clone(),
            PriceAggregator::new(AggregatorConfig::from(&cfg.pricing)),
        ));

        let refresher = Arc::new(BackgroundRefresher::new(
            cache.clone(),
            scheduler.clone(),
            updater.clone(),
        ));

        Self {
            cache,
            registry,
            scheduler,
            controller,
            updater,
            refresher,
            notifier,
            profit,
            tick_interval: cfg.scheduler.tick_interval(),
            refresh_interval: cfg.scheduler.refresh_interval(),
            sweep_interval: cfg.cache.sweep_interval(),
        }
    }

    // -- Accessors -------------------------------------------------------

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<OverlayRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<FetchScheduler> {
        &self.scheduler
    }

    pub fn controller(&self) -> &Arc<SynchronizationController> {
        &self.controller
    }

    pub fn profit(&self) -> &ProfitCalculator {
        &self.profit
    }

    // -- Operations ------------------------------------------------------

    /// One synchronization pass over `surface`.
    pub async fn scan(&self, surface: &dyn CatalogSurface) -> ScanOutcome {
        self.controller.process(surface).await
    }

    /// Subscribe to `surface`, run the initial scan, then start the change
    /// listener, scheduler, background refresh and cache sweep tasks.
    pub async fn spawn(&self, surface: Arc<dyn CatalogSurface>) -> EngineHandle {
        // Subscribe first so changes during the initial scan are not lost.
        let events = surface.subscribe();
        self.controller.process(surface.as_ref()).await;

        let refresh: Arc<dyn DetailRefresh> = self.updater.clone();
        let tasks = vec![
            tokio::spawn(run_listener(self.controller.clone(), surface, events)),
            tokio::spawn(run_scheduler(self.scheduler.clone(), refresh, self.tick_interval)),
            tokio::spawn(run_refresher(self.refresher.clone(), self.refresh_interval)),
            tokio::spawn(run_sweeper(self.cache.clone(), self.sweep_interval)),
        ];

        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            refresh_ms = self.refresh_interval.as_millis() as u64,
            sweep_secs = self.sweep_interval.as_secs(),
            known_details = self.cache.all_detailed_ids().len(),
            "Engine started"
        );

        EngineHandle { tasks }
    }

    /// User-triggered detail fetch for `id`.
    ///
    /// Takes `id` off the fetch queue, fetches and stores its details, and
    /// refreshes its overlays. On failure the user is notified once and the
    /// error is returned.
    pub async fn request_details(
        &self,
        id: &EntityId,
        listing_price: Option<u64>,
    ) -> Result<DetailReport> {
        self.scheduler.remove(id);

        match self.updater.update(id).await {
            Ok((details, average)) => {
                let updated_at = self.cache.get_detailed(id).map(|d| d.fetched_at);
                Ok(DetailReport::build(
                    id.clone(),
                    &details,
                    average,
                    updated_at,
                    listing_price,
                    &self.profit,
                    Utc::now(),
                ))
            }
            Err(e) => {
                error!(entity = %id, error = %e, "Detail request failed");
                self.notifier.notify(DETAIL_FAILURE_NOTICE);
                Err(e)
            }
        }
    }
}

/// Running engine tasks.
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Abort every task and wait for them to wind down. In-flight fetches
    /// are dropped with them.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        let count = self.tasks.len();
        join_all(self.tasks).await;
        info!(tasks = count, "Engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
