//! Per-event mutual exclusion.
//!
//! Every seat-affecting operation on one event runs while holding that
//! event's lock; operations on different events never wait on each other.
//! Waiters are served in arrival order (`tokio::sync::Mutex` is fair).
//!
//! Entries are created on first use and dropped again once the last holder
//! or waiter releases, so the table only tracks events with work in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use evently_core::EventId;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
pub struct EventLocks {
    slots: Arc<Mutex<HashMap<EventId, Slot>>>,
}

impl EventLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `event_id`.
    pub async fn acquire(&self, event_id: EventId) -> EventGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.entry(event_id).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;

        EventGuard {
            event_id,
            slot,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of events with a holder or waiter.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one event; released on drop.
#[derive(Debug)]
pub struct EventGuard {
    event_id: EventId,
    slot: Slot,
    slots: Arc<Mutex<HashMap<EventId, Slot>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EventGuard {
    pub fn event_id(&self) -> EventId {
        self.event_id
    }
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        // Unlock first so a waiter can proceed.
        self.guard.take();

        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Table + this guard are the only owners: nobody else holds or waits.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.event_id);
        }
    }
}
