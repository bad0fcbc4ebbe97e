//! Remote price service integration.
//!
//! Defines the `PriceSource` trait and the fut.gg implementation.
//! The engine only ever talks to the trait, so tests swap in fakes.

pub mod futgg;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{BulkQuote, EntityDetails, EntityId};

/// Abstraction over the remote price service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current listing prices for `ids` in one request.
    ///
    /// Never fails: transport or parse problems yield an empty list, since
    /// callers treat missing prices as "not known yet".
    async fn fetch_bulk_prices(&self, ids: &[EntityId]) -> Vec<BulkQuote>;

    /// Sale history and market overview for one entity.
    async fn fetch_entity_details(&self, id: &EntityId) -> Result<EntityDetails>;
}
