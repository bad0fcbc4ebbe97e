//! fut.gg price feed.
//!
//! Bulk:   GET /api/fut/player-prices/{version}/?ids=1,2,3&platform=pc
//! Detail: GET /api/fut/player-prices/{version}/{id}/?platform=pc
//!
//! Both responses wrap their payload in `{ "data": ... }`.
//! Auth: none.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PriceSource;
use crate::config::ApiConfig;
use crate::types::{BulkQuote, EntityDetails, EntityId, FeedError};

// ---------------------------------------------------------------------------
// API response types (fut.gg JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
}

/// One entry of the bulk response. Only the fields we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerPrice {
    ea_id: EntityId,
    #[serde(default)]
    price: Option<u64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FutGgClient {
    http: Client,
    base_url: String,
    api_version: String,
    platform: String,
}

impl FutGgClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("Failed to build HTTP client for fut.gg")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            platform: cfg.platform.clone(),
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn bulk_url(&self, ids: &[EntityId]) -> String {
        let joined = ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/api/fut/player-prices/{}/?ids={}&platform={}",
            self.base_url,
            self.api_version,
            urlencoding::encode(&joined),
            urlencoding::encode(&self.platform),
        )
    }

    fn detail_url(&self, id: &EntityId) -> String {
        format!(
            "{}/api/fut/player-prices/{}/{}/?platform={}",
            self.base_url,
            self.api_version,
            urlencoding::encode(id.as_str()),
            urlencoding::encode(&self.platform),
        )
    }

    /// GET `url` and decode the `data` envelope.
    async fn get_data<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FeedError> {
        debug!(url = %url, "Fetching fut.gg prices");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| FeedError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        let text = resp.text().await.map_err(|source| FeedError::Transport {
            url: url.to_string(),
            source,
        })?;

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| FeedError::Malformed(e.to_string()))?;

        envelope
            .data
            .ok_or_else(|| FeedError::Malformed("missing `data` field".to_string()))
    }
}

// ---------------------------------------------------------------------------
// PriceSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl PriceSource for FutGgClient {
    async fn fetch_bulk_prices(&self, ids: &[EntityId]) -> Vec<BulkQuote> {
        if ids.is_empty() {
            return Vec::new();
        }

        let url = self.bulk_url(ids);
        match self.get_data::<Vec<PlayerPrice>>(&url).await {
            Ok(items) => {
                let quotes: Vec<BulkQuote> = items
                    .into_iter()
                    .filter_map(|item| {
                        item.price.map(|price| BulkQuote {
                            entity_id: item.ea_id,
                            price,
                        })
                    })
                    .collect();
                debug!(requested = ids.len(), priced = quotes.len(), "Bulk prices fetched");
                quotes
            }
            Err(e) => {
                warn!(requested = ids.len(), error = %e, "Bulk price lookup failed");
                Vec::new()
            }
        }
    }

    async fn fetch_entity_details(&self, id: &EntityId) -> Result<EntityDetails> {
        let url = self.detail_url(id);
        let details = self
            .get_data::<EntityDetails>(&url)
            .await
            .with_context(|| format!("Detail lookup failed for {id}"))?;

        debug!(
            entity = %id,
            completed = details.completed_auctions.len(),
            live = details.live_auctions.len(),
            "Entity details fetched"
        );

        Ok(details)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
