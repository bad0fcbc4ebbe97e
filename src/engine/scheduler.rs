//! Detail fetch scheduler.
//!
//! FIFO queue of entities awaiting a detail fetch, deduplicated by a
//! parallel pending set (an id is pending iff it is queued). A fixed-rate
//! driver services one id per tick, and the shared `FetchPhase` keeps at
//! most one detail fetch in flight across the scheduler and the background
//! refresh cycle. That bounds outbound detail requests to one per tick
//! regardless of queue depth.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::updater::DetailRefresh;
use crate::types::EntityId;

/// Whether a detail fetch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Busy,
}

/// What a single scheduler tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another fetch was in flight.
    Busy,
    /// Nothing queued.
    Empty,
    Refreshed(EntityId),
    Failed(EntityId),
}

struct QueueState {
    queue: VecDeque<EntityId>,
    pending: HashSet<EntityId>,
    phase: FetchPhase,
}

pub struct FetchScheduler {
    state: Mutex<QueueState>,
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                pending: HashSet::new(),
                phase: FetchPhase::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -- Queue -----------------------------------------------------------

    /// Append `id` unless it is already pending. Returns whether it was added.
    pub fn enqueue(&self, id: EntityId) -> bool {
        let mut state = self.lock();
        if !state.pending.insert(id.clone()) {
            return false;
        }
        debug!(entity = %id, depth = state.queue.len() + 1, "Queued for detail fetch");
        state.queue.push_back(id);
        true
    }

    pub fn dequeue(&self) -> Option<EntityId> {
        let mut state = self.lock();
        let id = state.queue.pop_front()?;
        state.pending.remove(&id);
        Some(id)
    }

    /// Drop `id` wherever it sits in the queue.
    pub fn remove(&self, id: &EntityId) {
        let mut state = self.lock();
        if state.pending.remove(id) {
            state.queue.retain(|queued| queued != id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_pending(&self, id: &EntityId) -> bool {
        self.lock().pending.contains(id)
    }

    /// Queued ids, head first.
    pub fn snapshot(&self) -> Vec<EntityId> {
        self.lock().queue.iter().cloned().collect()
    }

    // -- In-flight guard -------------------------------------------------

    pub fn phase(&self) -> FetchPhase {
        self.lock().phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase() == FetchPhase::Busy
    }

    /// Claim the in-flight slot. Released when the guard drops, on every
    /// exit path.
    pub fn try_begin(&self) -> Option<BusyGuard<'_>> {
        let mut state = self.lock();
        if state.phase == FetchPhase::Busy {
            return None;
        }
        state.phase = FetchPhase::Busy;
        Some(BusyGuard { scheduler: self })
    }

    /// One scheduler tick: fetch the head of the queue unless a fetch is
    /// already in flight.
    pub async fn tick(&self, refresh: &dyn DetailRefresh) -> TickOutcome {
        let (id, _guard) = {
            let mut state = self.lock();
            if state.phase == FetchPhase::Busy {
                return TickOutcome::Busy;
            }
            let Some(id) = state.queue.pop_front() else {
                return TickOutcome::Empty;
            };
            state.pending.remove(&id);
            state.phase = FetchPhase::Busy;
            (id, BusyGuard { scheduler: self })
        };

        match refresh.refresh(&id).await {
            Ok(()) => TickOutcome::Refreshed(id),
            Err(e) => {
                warn!(entity = %id, error = %e, "Scheduled detail fetch failed");
                TickOutcome::Failed(id)
            }
        }
    }
}

/// Holds the scheduler in `FetchPhase::Busy` until dropped.
pub struct BusyGuard<'a> {
    scheduler: &'a FetchScheduler,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock().phase = FetchPhase::Idle;
    }
}

/// Drive scheduler ticks at a fixed interval until the task is aborted.
pub async fn run_scheduler(
    scheduler: Arc<FetchScheduler>,
    refresh: Arc<dyn DetailRefresh>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        scheduler.tick(refresh.as_ref()).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
