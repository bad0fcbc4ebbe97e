//! Persistence layer.
//!
//! The long-lived detailed-price tier lives in a single JSON slot on disk:
//! a map from entity id to `{ averageSalePrice, fetchedAt }`. It is read
//! once at startup and rewritten in full on every detailed write.

pub mod cache;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{DetailedPrice, EntityId};

pub use cache::ValueCache;

/// Contents of the durable slot.
pub type DetailedTier = BTreeMap<EntityId, DetailedPrice>;

/// Write the full detailed tier to `path`.
///
/// The tier goes to a sibling temp file first and is renamed over the slot,
/// so a reader never sees a half-written file.
pub fn save_detailed(tier: &DetailedTier, path: &Path) -> Result<()> {
    let json = serde_json::to_string(tier).context("Failed to serialise detailed cache")?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "detailed".to_string());
    let staging = path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()));

    std::fs::write(&staging, &json)
        .with_context(|| format!("Failed to write detailed cache to {}", staging.display()))?;
    if let Err(e) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(e)
            .with_context(|| format!("Failed to move detailed cache into {}", path.display()));
    }

    debug!(path = %path.display(), entries = tier.len(), "Detailed cache saved");
    Ok(())
}

/// Read the detailed tier from `path`.
/// Returns `None` if the slot doesn't exist yet.
pub fn load_detailed(path: &Path) -> Result<Option<DetailedTier>> {
    if !path.exists() {
        info!(path = %path.display(), "No saved detailed cache, starting empty");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read detailed cache from {}", path.display()))?;

    let tier: DetailedTier = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse detailed cache from {}", path.display()))?;

    info!(path = %path.display(), entries = tier.len(), "Detailed cache loaded from disk");

    Ok(Some(tier))
}

/// Delete the slot (for testing or reset).
pub fn delete_slot(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete detailed cache {}", path.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("fcprices_test_slot_{}.json", Uuid::new_v4()));
        p
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let mut tier = DetailedTier::new();
        tier.insert(
            EntityId::from("100"),
            DetailedPrice {
                average_sale_price: Some(25_000),
                fetched_at: Utc::now(),
            },
        );
        tier.insert(
            EntityId::from("200"),
            DetailedPrice {
                average_sale_price: None,
                fetched_at: Utc::now(),
            },
        );
        save_detailed(&tier, &path).unwrap();

        let loaded = load_detailed(&path).unwrap().unwrap();
        assert_eq!(loaded, tier);

        delete_slot(&path).unwrap();
    }

    #[test]
    fn test_overwrite_leaves_no_staging_files() {
        let dir = std::env::temp_dir().join(format!("fcprices_test_dir_{}", Uuid::new_v4()));
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join("slot.json");

        let mut tier = DetailedTier::new();
        for avg in [100, 200, 300] {
            tier.insert(
                EntityId::from("1"),
                DetailedPrice {
                    average_sale_price: Some(avg),
                    fetched_at: Utc::now(),
                },
            );
            save_detailed(&tier, &path).unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["slot.json"]);
        let loaded = load_detailed(&path).unwrap().unwrap();
        assert_eq!(loaded[&EntityId::from("1")].average_sale_price, Some(300));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/tmp/fcprices_nonexistent_slot_12345.json");
        assert!(load_detailed(&path).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let path = temp_path();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_detailed(&path).is_err());
        delete_slot(&path).unwrap();
    }

    #[test]
    fn test_delete_nonexistent_ok() {
        let result = delete_slot(Path::new("/tmp/fcprices_does_not_exist_xyz.json"));
        assert!(result.is_ok());
    }
}
