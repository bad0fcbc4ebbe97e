//! Detail view data and formatting helpers.
//!
//! `DetailReport` is what a foreground detail request hands back: the
//! price summary, profit breakdown and the sale/live auction tables.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::fmt;

use crate::strategy::ProfitCalculator;
use crate::types::{EntityDetails, EntityId};

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// `1234567` → `"1,234,567"`.
pub fn format_coins(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Signed variant of [`format_coins`] for profits.
pub fn format_signed_coins(amount: i64) -> String {
    if amount < 0 {
        format!("-{}", format_coins(amount.unsigned_abs()))
    } else {
        format_coins(amount as u64)
    }
}

/// Minutes/hours ago for recent times, absolute timestamp otherwise.
pub fn format_relative(when: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - when).num_minutes();
    if minutes < 60 {
        format!("{}m ago", minutes.max(0))
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        when.format("%Y-%m-%d %H:%M").to_string()
    }
}

fn coins_or_dash(amount: Option<u64>) -> String {
    amount.map(format_coins).unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SaleRow {
    pub sold_price: Option<u64>,
    pub when: String,
}

#[derive(Debug, Clone)]
pub struct LiveRow {
    pub buy_now_price: Option<u64>,
    pub starting_bid: Option<u64>,
    pub ends: String,
}

#[derive(Debug, Clone)]
pub struct DetailReport {
    pub entity_id: EntityId,
    pub listing_price: Option<u64>,
    pub current_price: Option<u64>,
    pub average_sale_price: Option<u64>,
    pub average_updated_at: Option<DateTime<Utc>>,
    /// Average sale price after tax, rounded.
    pub after_tax: Option<u64>,
    pub net_profit: Option<i64>,
    pub average_bin: Option<u64>,
    pub cheapest_sale: Option<u64>,
    pub discard_value: Option<u64>,
    pub price_range: Option<(Option<u64>, Option<u64>)>,
    pub completed: Vec<SaleRow>,
    pub live: Vec<LiveRow>,
}

impl DetailReport {
    pub fn build(
        entity_id: EntityId,
        details: &EntityDetails,
        average_sale_price: Option<u64>,
        average_updated_at: Option<DateTime<Utc>>,
        listing_price: Option<u64>,
        profit: &ProfitCalculator,
        now: DateTime<Utc>,
    ) -> Self {
        let (after_tax, net_profit) = match (listing_price, average_sale_price) {
            (Some(listing), Some(avg)) if listing > 0 && avg > 0 => (
                profit.after_tax(avg).round().to_u64(),
                profit.net_profit(listing, avg).round().to_i64(),
            ),
            _ => (None, None),
        };

        let relative = |d: Option<DateTime<Utc>>| {
            d.map(|d| format_relative(d, now)).unwrap_or_else(|| "-".to_string())
        };

        let overview = details.overview.clone().unwrap_or_default();

        Self {
            entity_id,
            listing_price,
            current_price: details.current_price.as_ref().and_then(|c| c.price),
            average_sale_price,
            average_updated_at: average_sale_price.and(average_updated_at),
            after_tax,
            net_profit,
            average_bin: overview.average_bin,
            cheapest_sale: overview.cheapest_sale,
            discard_value: overview.discard_value,
            price_range: details
                .price_range
                .as_ref()
                .map(|r| (r.min_price, r.max_price)),
            completed: details
                .completed_auctions
                .iter()
                .map(|a| SaleRow {
                    sold_price: a.sold_price,
                    when: relative(a.sold_date),
                })
                .collect(),
            live: details
                .live_auctions
                .iter()
                .map(|a| LiveRow {
                    buy_now_price: a.buy_now_price,
                    starting_bid: a.starting_bid,
                    ends: relative(a.end_date),
                })
                .collect(),
        }
    }
}

impl fmt::Display for DetailReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Price details for {}", self.entity_id)?;
        if let Some(listing) = self.listing_price {
            writeln!(f, "  Listing price:   {}", format_coins(listing))?;
        }
        writeln!(f, "  Current price:   {}", coins_or_dash(self.current_price))?;
        if let Some(avg) = self.average_sale_price {
            writeln!(f, "  Avg recent sale: {}", format_coins(avg))?;
            if let (Some(after_tax), Some(profit)) = (self.after_tax, self.net_profit) {
                writeln!(f, "  After tax:       {}", format_coins(after_tax))?;
                writeln!(f, "  Net profit:      {}", format_signed_coins(profit))?;
            }
            if let Some(at) = self.average_updated_at {
                writeln!(f, "  Avg updated at:  {}", at.format("%Y-%m-%d %H:%M:%S"))?;
            }
        }
        writeln!(f, "  Average BIN:     {}", coins_or_dash(self.average_bin))?;
        writeln!(f, "  Cheapest sale:   {}", coins_or_dash(self.cheapest_sale))?;
        writeln!(f, "  Discard value:   {}", coins_or_dash(self.discard_value))?;
        if let Some((min, max)) = self.price_range {
            writeln!(f, "  Price range:     {} - {}", coins_or_dash(min), coins_or_dash(max))?;
        }

        if !self.completed.is_empty() {
            writeln!(f, "  Recent completed auctions ({}):", self.completed.len())?;
            for row in &self.completed {
                writeln!(f, "    {:>12}  {}", coins_or_dash(row.sold_price), row.when)?;
            }
        }
        if !self.live.is_empty() {
            writeln!(f, "  Live auctions ({}):", self.live.len())?;
            for row in &self.live {
                writeln!(
                    f,
                    "    {:>12}  {:>12}  {}",
                    coins_or_dash(row.buy_now_price),
                    coins_or_dash(row.starting_bid),
                    row.ends
                )?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
