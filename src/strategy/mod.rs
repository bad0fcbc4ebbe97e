//! Pricing strategy: representative sale price and good-deal detection.

pub mod aggregate;
pub mod profit;

pub use aggregate::{AggregatorConfig, PriceAggregator};
pub use profit::{ProfitCalculator, ProfitConfig};
