//! Entity → live overlay registry.
//!
//! Registration is additive. Handles that left the surface stay registered
//! until the next `prune_disconnected` for their entity, which must run
//! before any pass that iterates an entity's handles.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::surface::OverlayHandle;
use crate::types::EntityId;

#[derive(Default)]
pub struct OverlayRegistry {
    entries: Mutex<HashMap<EntityId, HashSet<OverlayHandle>>>,
}

impl OverlayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, HashSet<OverlayHandle>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(&self, id: EntityId, handle: OverlayHandle) {
        self.lock().entry(id).or_default().insert(handle);
    }

    /// Remove `handle` from the set of the entity it is tagged with.
    pub fn unregister(&self, handle: &OverlayHandle) {
        let mut entries = self.lock();
        let id = handle.entity_id();
        if let Some(set) = entries.get_mut(id) {
            set.remove(handle);
            if set.is_empty() {
                entries.remove(id);
            }
        }
    }

    /// Drop every handle of `id` that is no longer attached to the surface.
    pub fn prune_disconnected(&self, id: &EntityId) {
        let mut entries = self.lock();
        let Some(set) = entries.get_mut(id) else {
            return;
        };

        let before = set.len();
        set.retain(|h| h.is_attached());
        if before != set.len() {
            debug!(entity = %id, pruned = before - set.len(), "Pruned detached overlays");
        }

        if set.is_empty() {
            entries.remove(id);
        }
    }

    /// Snapshot of the handles registered for `id`.
    pub fn overlays(&self, id: &EntityId) -> Option<Vec<OverlayHandle>> {
        self.lock().get(id).map(|set| set.iter().cloned().collect())
    }

    pub fn entity_count(&self) -> usize {
        self.lock().len()
    }

    pub fn handle_count(&self) -> usize {
        self.lock().values().map(HashSet::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::memory::MemoryEntry;
    use crate::surface::{CatalogEntry, OverlayView};
    use std::sync::Arc;

    fn attached_handle(entry: &Arc<dyn CatalogEntry>, id: &str) -> OverlayHandle {
        let h = OverlayHandle::new(
            EntityId::from(id),
            OverlayView {
                price: 1,
                average: None,
            },
            Arc::downgrade(entry),
        );
        h.mark_attached();
        h
    }

    fn entry() -> Arc<dyn CatalogEntry> {
        Arc::new(MemoryEntry::new("x", None))
    }

    #[test]
    fn test_prune_one_of_two() {
        let reg = OverlayRegistry::new();
        let e = entry();
        let a = attached_handle(&e, "1");
        let b = attached_handle(&e, "1");
        reg.register(EntityId::from("1"), a.clone());
        reg.register(EntityId::from("1"), b.clone());

        a.detach();
        // Detached handles linger until pruned.
        assert_eq!(reg.overlays(&EntityId::from("1")).unwrap().len(), 2);

        reg.prune_disconnected(&EntityId::from("1"));
        assert_eq!(reg.overlays(&EntityId::from("1")).unwrap(), vec![b]);
    }

    #[test]
    fn test_prune_all_drops_entity() {
        let reg = OverlayRegistry::new();
        let e = entry();
        let a = attached_handle(&e, "1");
        let b = attached_handle(&e, "1");
        reg.register(EntityId::from("1"), a.clone());
        reg.register(EntityId::from("1"), b.clone());

        a.detach();
        b.detach();
        reg.prune_disconnected(&EntityId::from("1"));
        assert!(reg.overlays(&EntityId::from("1")).is_none());
        assert_eq!(reg.entity_count(), 0);
    }

    #[test]
    fn test_prune_unknown_entity_is_noop() {
        let reg = OverlayRegistry::new();
        reg.prune_disconnected(&EntityId::from("nope"));
        assert_eq!(reg.entity_count(), 0);
    }

    #[test]
    fn test_unregister_uses_handle_tag() {
        let reg = OverlayRegistry::new();
        let e = entry();
        let a = attached_handle(&e, "1");
        let b = attached_handle(&e, "2");
        reg.register(EntityId::from("1"), a.clone());
        reg.register(EntityId::from("2"), b.clone());

        reg.unregister(&a);
        assert!(reg.overlays(&EntityId::from("1")).is_none());
        assert_eq!(reg.handle_count(), 1);

        // Unregistering twice is harmless.
        reg.unregister(&a);
        assert_eq!(reg.handle_count(), 1);
    }

    #[test]
    fn test_register_is_idempotent_per_handle() {
        let reg = OverlayRegistry::new();
        let e = entry();
        let a = attached_handle(&e, "1");
        reg.register(EntityId::from("1"), a.clone());
        reg.register(EntityId::from("1"), a);
        assert_eq!(reg.handle_count(), 1);
    }
}
