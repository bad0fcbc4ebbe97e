//! Catalog surface contract.
//!
//! The surface (the third-party catalog view) is owned by someone else and
//! mutates on its own schedule. The engine only consumes it through these
//! traits:
//! - enumerate entries, read their entity id and listing price;
//! - locate the one overlay slot of an entry;
//! - toggle the entry's good-deal marker;
//! - subscribe to "container changed" signals.
//!
//! Overlays are engine-owned values attached into slots. Whether one is
//! still attached is only checked lazily (see `OverlayRegistry::prune_disconnected`).

pub mod memory;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::report::format_coins;
use crate::types::EntityId;

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

/// What an overlay displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayView {
    /// Current bulk listing price.
    pub price: u64,
    /// Representative sale price, when known.
    pub average: Option<u64>,
}

impl fmt::Display for OverlayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_coins(self.price))?;
        if let Some(avg) = self.average {
            write!(f, " (Avg: {})", format_coins(avg))?;
        }
        Ok(())
    }
}

struct OverlayInner {
    key: Uuid,
    entity_id: EntityId,
    view: Mutex<OverlayView>,
    attached: AtomicBool,
    owner: Weak<dyn CatalogEntry>,
}

/// Shared reference to one overlay element.
///
/// Cloning yields another reference to the same element; equality and
/// hashing follow element identity, not content.
#[derive(Clone)]
pub struct OverlayHandle(Arc<OverlayInner>);

impl OverlayHandle {
    /// A new, not yet attached overlay tagged with `entity_id`.
    pub fn new(entity_id: EntityId, view: OverlayView, owner: Weak<dyn CatalogEntry>) -> Self {
        Self(Arc::new(OverlayInner {
            key: Uuid::new_v4(),
            entity_id,
            view: Mutex::new(view),
            attached: AtomicBool::new(false),
            owner,
        }))
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.0.entity_id
    }

    pub fn view(&self) -> OverlayView {
        *self.0.view.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_view(&self, view: OverlayView) {
        *self.0.view.lock().unwrap_or_else(|p| p.into_inner()) = view;
    }

    pub fn is_attached(&self) -> bool {
        self.0.attached.load(Ordering::Acquire)
    }

    /// Called by the surface when the overlay is placed into a slot.
    pub fn mark_attached(&self) {
        self.0.attached.store(true, Ordering::Release);
    }

    /// Called by the surface when the overlay (or an ancestor) leaves the view.
    pub fn detach(&self) {
        self.0.attached.store(false, Ordering::Release);
    }

    /// The entry this overlay was created for, if it still exists.
    pub fn owner(&self) -> Option<Arc<dyn CatalogEntry>> {
        self.0.owner.upgrade()
    }
}

impl PartialEq for OverlayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key
    }
}

impl Eq for OverlayHandle {}

impl Hash for OverlayHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state);
    }
}

impl fmt::Debug for OverlayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayHandle")
            .field("entity_id", &self.0.entity_id)
            .field("view", &self.view())
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Surface traits
// ---------------------------------------------------------------------------

/// Signals emitted by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The container's set of child entries changed.
    ContainerChanged,
}

/// The catalog container.
pub trait CatalogSurface: Send + Sync {
    /// Direct child entries, in display order.
    fn entries(&self) -> Vec<Arc<dyn CatalogEntry>>;

    /// Change notifications for the container.
    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
}

/// One rendered catalog entry.
pub trait CatalogEntry: Send + Sync {
    fn entity_id(&self) -> Option<EntityId>;

    /// Listing price currently displayed on the entry.
    fn listing_price(&self) -> Option<u64>;

    /// Region that can hold one overlay, if the entry has one.
    fn overlay_slot(&self) -> Option<&dyn OverlaySlot>;

    fn set_good_deal(&self, good_deal: bool);
}

/// Holder for at most one overlay.
pub trait OverlaySlot: Send + Sync {
    fn current(&self) -> Option<OverlayHandle>;

    /// Place `overlay` in the slot, replacing (and detaching) any previous one.
    fn attach(&self, overlay: OverlayHandle);

    /// Remove and detach the current overlay, if any.
    fn clear(&self);
}

// ---------------------------------------------------------------------------
// User notification
// ---------------------------------------------------------------------------

/// Interruptive, user-visible notices (foreground failures only).
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!(message, "User notification");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
