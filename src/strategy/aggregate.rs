//! Representative sale price.
//!
//! Reduces the most recent completed sales of an entity to one price:
//! IQR fence first (extreme tails), then a median-deviation band
//! (moderate noise around the centre), then the rounded mean.
//! The filters never discard everything: each stage falls back to its
//! input when it would leave nothing.

use tracing::debug;

use crate::config::PricingConfig;
use crate::types::EntityDetails;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Sales considered, most recent first.
    pub top_n: usize,
    pub iqr_multiplier: f64,
    /// Maximum `|price - median| / median` kept by the second stage.
    pub median_deviation: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            iqr_multiplier: 1.5,
            median_deviation: 0.3,
        }
    }
}

impl From<&PricingConfig> for AggregatorConfig {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            top_n: cfg.top_sales_count,
            iqr_multiplier: cfg.outlier_iqr_multiplier,
            median_deviation: cfg.outlier_median_deviation,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PriceAggregator {
    config: AggregatorConfig,
}

impl PriceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Representative price of the latest sales in `details`.
    pub fn average_sale_price(&self, details: &EntityDetails) -> Option<u64> {
        self.aggregate(&details.sold_prices())
    }

    /// Rounded mean of the outlier-filtered top-N prices.
    ///
    /// `prices` must be ordered most recent first. Returns `None` only for
    /// an empty input.
    pub fn aggregate(&self, prices: &[u64]) -> Option<u64> {
        let recent = &prices[..prices.len().min(self.config.top_n)];
        let kept = self.filter_outliers(recent);
        if kept.is_empty() {
            return None;
        }

        let sum: f64 = kept.iter().map(|&p| p as f64).sum();
        let mean = (sum / kept.len() as f64).round() as u64;

        debug!(
            input = recent.len(),
            kept = kept.len(),
            mean,
            "Aggregated sale prices"
        );

        Some(mean)
    }

    /// Two-stage outlier filter with fallback.
    pub fn filter_outliers(&self, prices: &[u64]) -> Vec<u64> {
        if prices.is_empty() {
            return Vec::new();
        }

        let mut sorted = prices.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();

        let median = sorted[(n - 1) / 2] as f64;
        let q1 = sorted[n / 4] as f64;
        let q3 = sorted[(n * 3) / 4] as f64;
        let iqr = q3 - q1;
        let lower = q1 - self.config.iqr_multiplier * iqr;
        let upper = q3 + self.config.iqr_multiplier * iqr;

        let fenced: Vec<u64> = prices
            .iter()
            .copied()
            .filter(|&p| (p as f64) >= lower && (p as f64) <= upper)
            .collect();

        if fenced.is_empty() {
            return prices.to_vec();
        }

        // A zero median has no meaningful relative deviation.
        if median <= 0.0 {
            return fenced;
        }

        let banded: Vec<u64> = fenced
            .iter()
            .copied()
            .filter(|&p| ((p as f64) - median).abs() / median <= self.config.median_deviation)
            .collect();

        if banded.is_empty() {
            fenced
        } else {
            banded
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
