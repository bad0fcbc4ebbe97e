//! In-memory catalog surface.
//!
//! Mirrors a catalog held as plain data: the binary feeds it from a JSON
//! snapshot, tests drive it directly. Replacing entries behaves like a
//! re-render of the real view: old entries (and their overlays) are
//! dropped and detached, and a change signal is emitted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

use super::{CatalogEntry, CatalogSurface, OverlayHandle, OverlaySlot, SurfaceEvent};
use crate::types::EntityId;

/// Pending change signals kept per subscriber before it lags.
const EVENT_BUFFER: usize = 16;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySlot {
    overlay: Mutex<Option<OverlayHandle>>,
}

impl OverlaySlot for MemorySlot {
    fn current(&self) -> Option<OverlayHandle> {
        lock(&self.overlay).clone()
    }

    fn attach(&self, overlay: OverlayHandle) {
        overlay.mark_attached();
        if let Some(previous) = lock(&self.overlay).replace(overlay) {
            previous.detach();
        }
    }

    fn clear(&self) {
        if let Some(previous) = lock(&self.overlay).take() {
            previous.detach();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

pub struct MemoryEntry {
    entity_id: Option<EntityId>,
    listing_price: Option<u64>,
    slot: Option<MemorySlot>,
    good_deal: AtomicBool,
}

impl MemoryEntry {
    pub fn new(entity_id: &str, listing_price: Option<u64>) -> Self {
        Self {
            entity_id: Some(EntityId::from(entity_id)),
            listing_price,
            slot: Some(MemorySlot::default()),
            good_deal: AtomicBool::new(false),
        }
    }

    /// An entry that carries no entity id (headers, placeholders).
    pub fn anonymous() -> Self {
        Self {
            entity_id: None,
            listing_price: None,
            slot: Some(MemorySlot::default()),
            good_deal: AtomicBool::new(false),
        }
    }

    /// An entry without a place to put an overlay.
    pub fn without_slot(entity_id: &str, listing_price: Option<u64>) -> Self {
        Self {
            slot: None,
            ..Self::new(entity_id, listing_price)
        }
    }

    pub fn is_good_deal(&self) -> bool {
        self.good_deal.load(Ordering::Acquire)
    }

    pub fn overlay(&self) -> Option<OverlayHandle> {
        self.slot.as_ref().and_then(|s| s.current())
    }

    /// Drop the overlay outside the engine's control.
    pub fn discard_overlay(&self) {
        if let Some(slot) = &self.slot {
            slot.clear();
        }
    }
}

impl CatalogEntry for MemoryEntry {
    fn entity_id(&self) -> Option<EntityId> {
        self.entity_id.clone()
    }

    fn listing_price(&self) -> Option<u64> {
        self.listing_price
    }

    fn overlay_slot(&self) -> Option<&dyn OverlaySlot> {
        self.slot.as_ref().map(|s| s as &dyn OverlaySlot)
    }

    fn set_good_deal(&self, good_deal: bool) {
        self.good_deal.store(good_deal, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One entry of a catalog snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub listing_price: Option<u64>,
}

/// Read a snapshot: a JSON array of `{ entityId, listingPrice }`.
pub fn load_snapshot(path: &Path) -> Result<Vec<SnapshotEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog snapshot {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse catalog snapshot {}", path.display()))
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

pub struct MemorySurface {
    entries: Mutex<Vec<Arc<MemoryEntry>>>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn with_entries(entries: Vec<Arc<MemoryEntry>>) -> Self {
        let surface = Self::new();
        *lock(&surface.entries) = entries;
        surface
    }

    /// Concrete entries, for inspection.
    pub fn memory_entries(&self) -> Vec<Arc<MemoryEntry>> {
        lock(&self.entries).clone()
    }

    pub fn push(&self, entry: Arc<MemoryEntry>) {
        lock(&self.entries).push(entry);
        self.notify();
    }

    /// Swap in a new page of entries. Overlays of the old page are detached.
    pub fn replace(&self, entries: Vec<Arc<MemoryEntry>>) {
        let old = std::mem::replace(&mut *lock(&self.entries), entries);
        for entry in &old {
            if let Some(overlay) = entry.overlay() {
                overlay.detach();
            }
        }
        self.notify();
    }

    /// Replace the entries with `snapshot` if it differs from what is shown.
    /// Returns whether anything changed.
    pub fn sync_snapshot(&self, snapshot: &[SnapshotEntry]) -> bool {
        let current: Vec<SnapshotEntry> = self
            .memory_entries()
            .iter()
            .map(|e| SnapshotEntry {
                entity_id: e.entity_id.clone(),
                listing_price: e.listing_price(),
            })
            .collect();

        if current == snapshot {
            return false;
        }

        let entries = snapshot
            .iter()
            .map(|s| {
                Arc::new(match &s.entity_id {
                    Some(id) => MemoryEntry::new(id.as_str(), s.listing_price),
                    None => MemoryEntry::anonymous(),
                })
            })
            .collect();
        debug!(entries = snapshot.len(), "Catalog snapshot changed");
        self.replace(entries);
        true
    }

    /// Emit a change signal. Nobody listening is fine.
    pub fn notify(&self) {
        let _ = self.events.send(SurfaceEvent::ContainerChanged);
    }
}

impl CatalogSurface for MemorySurface {
    fn entries(&self) -> Vec<Arc<dyn CatalogEntry>> {
        lock(&self.entries)
            .iter()
            .map(|e| e.clone() as Arc<dyn CatalogEntry>)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::OverlayView;

    fn overlay_for(entry: &Arc<MemoryEntry>) -> OverlayHandle {
        let as_dyn: Arc<dyn CatalogEntry> = entry.clone();
        OverlayHandle::new(
            entry.entity_id().unwrap(),
            OverlayView {
                price: 1,
                average: None,
            },
            Arc::downgrade(&as_dyn),
        )
    }

    #[test]
    fn test_slot_replaces_and_detaches() {
        let entry = Arc::new(MemoryEntry::new("1", Some(10)));
        let first = overlay_for(&entry);
        let second = overlay_for(&entry);
        let slot = entry.overlay_slot().unwrap();

        slot.attach(first.clone());
        assert!(first.is_attached());
        slot.attach(second.clone());
        assert!(!first.is_attached());
        assert!(second.is_attached());
        assert_eq!(slot.current(), Some(second.clone()));

        slot.clear();
        assert!(!second.is_attached());
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_replace_detaches_old_page() {
        let entry = Arc::new(MemoryEntry::new("1", Some(10)));
        let overlay = overlay_for(&entry);
        entry.overlay_slot().unwrap().attach(overlay.clone());

        let surface = MemorySurface::with_entries(vec![entry]);
        let mut rx = surface.subscribe();
        surface.replace(vec![Arc::new(MemoryEntry::new("2", Some(20)))]);

        assert!(!overlay.is_attached());
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::ContainerChanged);
        assert_eq!(surface.entries().len(), 1);
    }

    #[test]
    fn test_sync_snapshot_only_on_change() {
        let surface = MemorySurface::new();
        let snapshot = vec![
            SnapshotEntry {
                entity_id: Some(EntityId::from("7")),
                listing_price: Some(700),
            },
            SnapshotEntry {
                entity_id: None,
                listing_price: None,
            },
        ];
        assert!(surface.sync_snapshot(&snapshot));
        assert!(!surface.sync_snapshot(&snapshot));
        assert_eq!(surface.entries().len(), 2);
        assert_eq!(surface.entries()[0].listing_price(), Some(700));
        assert!(surface.entries()[1].entity_id().is_none());
    }

    #[test]
    fn test_snapshot_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("fcprices_snapshot_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"[{"entityId": 123, "listingPrice": 5000}, {}]"#).unwrap();

        let snapshot = load_snapshot(&path).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].entity_id, Some(EntityId::from("123")));
        assert_eq!(snapshot[1].listing_price, None);

        std::fs::remove_file(&path).unwrap();
    }
}
