//! Shared types for the FCPRICES engine.
//!
//! These types form the data model used across all modules.
//! They are kept free of engine logic so that the storage, platform,
//! strategy and engine modules can depend on them without cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entity identity
// ---------------------------------------------------------------------------

/// Stable identifier of one catalog item.
///
/// The catalog exposes it as an attribute string while the price feed
/// returns it as a JSON number, so deserialization accepts both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => EntityId(s),
            RawId::Number(n) => EntityId(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Cache records
// ---------------------------------------------------------------------------

/// A current listing price from the bulk lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkQuote {
    pub entity_id: EntityId,
    pub price: u64,
}

/// Short-lived bulk price record, stamped when written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPrice {
    pub price: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Long-lived representative sale price. `average_sale_price` is `None`
/// when the entity has no usable sale history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedPrice {
    pub average_sale_price: Option<u64>,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Detail lookup payload
// ---------------------------------------------------------------------------

/// Historical and live market data for one entity.
///
/// Every field is optional on the wire; missing sections deserialize to
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityDetails {
    /// Completed sales, most recent first.
    pub completed_auctions: Vec<CompletedAuction>,
    pub live_auctions: Vec<LiveAuction>,
    pub overview: Option<PriceOverview>,
    pub price_range: Option<PriceRange>,
    pub current_price: Option<CurrentPrice>,
}

impl EntityDetails {
    /// Sold prices in feed order (most recent first), skipping records
    /// without a price.
    pub fn sold_prices(&self) -> Vec<u64> {
        self.completed_auctions
            .iter()
            .filter_map(|a| a.sold_price)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletedAuction {
    pub sold_price: Option<u64>,
    pub sold_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveAuction {
    pub buy_now_price: Option<u64>,
    pub starting_bid: Option<u64>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceOverview {
    pub average_bin: Option<u64>,
    pub cheapest_sale: Option<u64>,
    pub discard_value: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceRange {
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurrentPrice {
    pub price: Option<u64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures talking to the remote price service.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Price feed unreachable ({url}): {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Price feed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed price feed response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
