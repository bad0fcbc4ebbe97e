//! Good-deal detection.
//!
//! Compares a listing price against the representative sale price after
//! the market's sale tax. Arithmetic is done in `Decimal` so the threshold
//! comparison is exact.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::PricingConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProfitConfig {
    pub tax_rate: Decimal,
    pub min_profit: Decimal,
}

impl Default for ProfitConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.05),
            min_profit: dec!(10000),
        }
    }
}

impl From<&PricingConfig> for ProfitConfig {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate,
            min_profit: cfg.min_profit,
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ProfitCalculator {
    config: ProfitConfig,
}

impl ProfitCalculator {
    pub fn new(config: ProfitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProfitConfig {
        &self.config
    }

    /// What the seller actually receives for `sale_price`.
    pub fn after_tax(&self, sale_price: u64) -> Decimal {
        Decimal::from(sale_price) * (Decimal::ONE - self.config.tax_rate)
    }

    /// `sale × (1 − tax) − listing`.
    pub fn net_profit(&self, listing_price: u64, sale_price: u64) -> Decimal {
        self.after_tax(sale_price) - Decimal::from(listing_price)
    }

    /// Buying at `listing_price` and reselling at `sale_price` clears the
    /// minimum profit. Missing or zero prices are never a good deal.
    pub fn is_good_deal(&self, listing_price: Option<u64>, sale_price: Option<u64>) -> bool {
        match (listing_price, sale_price) {
            (Some(listing), Some(sale)) if listing > 0 && sale > 0 => {
                self.net_profit(listing, sale) >= self.config.min_profit
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
