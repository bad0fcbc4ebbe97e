//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every field falls back to the stock value, so a partial file (or no
//! file at all) is a valid configuration. Nothing here is reloadable:
//! the engine reads it once at startup.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pricing: PricingConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub surface: SurfaceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PricingConfig {
    /// Minimum net profit (in coins) for a listing to count as a good deal.
    pub min_profit: Decimal,
    /// Fraction of the sale price withheld by the market on sale.
    pub tax_rate: Decimal,
    /// How many of the most recent sales feed the average.
    pub top_sales_count: usize,
    pub outlier_iqr_multiplier: f64,
    /// Maximum relative deviation from the median a sale may have.
    pub outlier_median_deviation: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            min_profit: dec!(10000),
            tax_rate: dec!(0.05),
            top_sales_count: 10,
            outlier_iqr_multiplier: 1.5,
            outlier_median_deviation: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub bulk_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Durable slot for detailed prices. Empty means in-memory only.
    pub storage_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bulk_ttl_secs: 120,
            sweep_interval_secs: 60,
            storage_path: "futgg_detailed_cache.json".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn bulk_ttl(&self) -> Duration {
        Duration::from_secs(self.bulk_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        if self.storage_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.storage_path))
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub refresh_interval_ms: u64,
    /// Delay before re-enumerating a surface that had no resolvable entries.
    pub scan_retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 300,
            refresh_interval_ms: 300,
            scan_retry_delay_ms: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn scan_retry_delay(&self) -> Duration {
        Duration::from_millis(self.scan_retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub platform: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.fut.gg".to_string(),
            api_version: "26".to_string(),
            platform: "pc".to_string(),
            timeout_secs: 30,
            user_agent: "FCPRICES/0.1.0 (price-overlay)".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SurfaceConfig {
    /// JSON snapshot of the catalog the binary mirrors.
    pub snapshot_path: String,
    pub reload_interval_secs: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "catalog.json".to_string(),
            reload_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use the stock configuration.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that would stall the timers or break the math.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_ms == 0 || self.scheduler.refresh_interval_ms == 0 {
            anyhow::bail!("scheduler intervals must be greater than zero");
        }
        if self.cache.sweep_interval_secs == 0 {
            anyhow::bail!("cache.sweep_interval_secs must be greater than zero");
        }
        if self.pricing.tax_rate < Decimal::ZERO || self.pricing.tax_rate >= Decimal::ONE {
            anyhow::bail!("pricing.tax_rate must be within [0, 1)");
        }
        if self.pricing.top_sales_count == 0 {
            anyhow::bail!("pricing.top_sales_count must be greater than zero");
        }
        Ok(())
    }
}
