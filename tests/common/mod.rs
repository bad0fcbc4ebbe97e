//! Shared fixtures for integration tests.
//!
//! `FakeSource` is a deterministic `PriceSource`: prices and sale
//! histories are set from test code, every call is recorded with the
//! (tokio) time it happened, and failures can be forced globally or per id.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use fcprices::config::AppConfig;
use fcprices::platforms::PriceSource;
use fcprices::surface::memory::MemoryEntry;
use fcprices::surface::Notifier;
use fcprices::types::{BulkQuote, CompletedAuction, EntityDetails, EntityId};

#[derive(Clone, Default)]
pub struct FakeSource {
    bulk: Arc<Mutex<HashMap<EntityId, u64>>>,
    sales: Arc<Mutex<HashMap<EntityId, Vec<u64>>>>,
    bulk_calls: Arc<Mutex<Vec<Vec<EntityId>>>>,
    detail_calls: Arc<Mutex<Vec<(EntityId, Instant)>>>,
    /// If set, every detail lookup fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
    failing: Arc<Mutex<HashSet<EntityId>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, id: &str, price: u64) {
        self.bulk.lock().unwrap().insert(EntityId::from(id), price);
    }

    /// Sale history for `id`, most recent first.
    pub fn set_sales(&self, id: &str, sales: &[u64]) {
        self.sales.lock().unwrap().insert(EntityId::from(id), sales.to_vec());
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(EntityId::from(id));
    }

    pub fn bulk_calls(&self) -> Vec<Vec<EntityId>> {
        self.bulk_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<EntityId> {
        self.detail_calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn detail_call_times(&self) -> Vec<Instant> {
        self.detail_calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl PriceSource for FakeSource {
    async fn fetch_bulk_prices(&self, ids: &[EntityId]) -> Vec<BulkQuote> {
        self.bulk_calls.lock().unwrap().push(ids.to_vec());
        let bulk = self.bulk.lock().unwrap();
        ids.iter()
            .filter_map(|id| {
                bulk.get(id).map(|&price| BulkQuote {
                    entity_id: id.clone(),
                    price,
                })
            })
            .collect()
    }

    async fn fetch_entity_details(&self, id: &EntityId) -> Result<EntityDetails> {
        self.detail_calls.lock().unwrap().push((id.clone(), Instant::now()));

        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(anyhow!("malformed detail payload for {id}"));
        }

        let sales = self.sales.lock().unwrap().get(id).cloned().unwrap_or_default();
        Ok(EntityDetails {
            completed_auctions: sales
                .into_iter()
                .map(|p| CompletedAuction {
                    sold_price: Some(p),
                    sold_date: None,
                })
                .collect(),
            ..EntityDetails::default()
        })
    }
}

/// Notifier that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Stock configuration with the detailed tier persisted to `slot`
/// (memory only when `None`).
pub fn config(slot: Option<&Path>) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.cache.storage_path = slot.map(|p| p.display().to_string()).unwrap_or_default();
    cfg
}

pub fn temp_slot() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("fcprices_it_{}.json", uuid::Uuid::new_v4()));
    p
}

pub fn entry(id: &str, listing: u64) -> Arc<MemoryEntry> {
    Arc::new(MemoryEntry::new(id, Some(listing)))
}
