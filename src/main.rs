//! fcprices binary.
//!
//! Loads configuration, initialises structured logging, mirrors a catalog
//! snapshot file into an in-memory surface and keeps it annotated with
//! prices until Ctrl+C. `fcprices details <id> [listing]` runs a single
//! foreground detail request instead.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use fcprices::config::AppConfig;
use fcprices::engine::Engine;
use fcprices::platforms::futgg::FutGgClient;
use fcprices::report::format_coins;
use fcprices::surface::memory::{load_snapshot, MemorySurface};
use fcprices::surface::{CatalogEntry, LogNotifier};
use fcprices::types::EntityId;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_or_default("config.toml")?;
    init_logging();

    let client = FutGgClient::new(&cfg.api)?;
    let engine = Engine::new(&cfg, Arc::new(client), Arc::new(LogNotifier));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("details") {
        return run_details(&engine, &args[1..]).await;
    }

    info!(
        platform = %cfg.api.platform,
        snapshot = %cfg.surface.snapshot_path,
        ttl_secs = cfg.cache.bulk_ttl_secs,
        min_profit = %cfg.pricing.min_profit,
        "fcprices starting up"
    );

    // -- Surface ---------------------------------------------------------

    let snapshot_path = Path::new(&cfg.surface.snapshot_path).to_path_buf();
    let surface = Arc::new(MemorySurface::new());
    reload_snapshot(&surface, &snapshot_path);

    let handle = engine.spawn(surface.clone()).await;

    // -- Main loop -------------------------------------------------------

    let reload_every = Duration::from_secs(cfg.surface.reload_interval_secs.max(1));
    let mut interval = tokio::time::interval(reload_every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut reported: HashSet<EntityId> = HashSet::new();

    info!("Watching catalog. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reload_snapshot(&surface, &snapshot_path);
                log_good_deals(&surface, &engine, &mut reported);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    handle.shutdown().await;
    info!(
        known_details = engine.cache().all_detailed_ids().len(),
        queued = engine.scheduler().len(),
        "fcprices shut down cleanly."
    );

    Ok(())
}

/// `details <id> [listing]`: fetch, print, exit.
async fn run_details(engine: &Engine, args: &[String]) -> Result<()> {
    let id = args
        .first()
        .map(|s| EntityId::new(s.as_str()))
        .context("usage: fcprices details <entityId> [listingPrice]")?;
    let listing = args
        .get(1)
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("listingPrice must be a whole number of coins")?;

    let report = engine.request_details(&id, listing).await?;
    println!("{report}");
    Ok(())
}

/// Mirror the snapshot file into the surface. A missing or broken file
/// leaves the surface as it is.
fn reload_snapshot(surface: &MemorySurface, path: &Path) {
    if !path.exists() {
        debug!(path = %path.display(), "No catalog snapshot yet");
        return;
    }
    match load_snapshot(path) {
        Ok(snapshot) => {
            if surface.sync_snapshot(&snapshot) {
                info!(entries = snapshot.len(), "Catalog reloaded");
            }
        }
        Err(e) => warn!(error = %e, "Failed to reload catalog snapshot"),
    }
}

/// Log entries that became good deals since the last call.
fn log_good_deals(surface: &MemorySurface, engine: &Engine, reported: &mut HashSet<EntityId>) {
    let mut current = HashSet::new();

    for entry in surface.memory_entries() {
        if !entry.is_good_deal() {
            continue;
        }
        let Some(id) = entry.entity_id() else {
            continue;
        };
        if !current.insert(id.clone()) || reported.contains(&id) {
            continue;
        }

        let sale = engine.controller().comparison_price(&id);
        let profit = entry
            .listing_price()
            .zip(sale)
            .map(|(listing, sale)| engine.profit().net_profit(listing, sale).round());

        info!(
            entity = %id,
            listing = entry.listing_price().map(format_coins).unwrap_or_default(),
            overlay = entry.overlay().map(|o| o.view().to_string()).unwrap_or_default(),
            net_profit = profit.map(|p| p.to_string()).unwrap_or_default(),
            "Good deal"
        );
    }

    *reported = current;
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fcprices=info"));

    let json_logging = std::env::var("FCPRICES_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
