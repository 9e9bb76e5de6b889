//! Capacity Registry
//!
//! Tracks slot capacity and usage per executor. Reservation is a non-blocking
//! compare-and-swap on a single counter: it either takes a free slot or returns `false`
//! straight away, so scheduling passes never wait on each other.

use super::types::ExecutorId;
use crate::error::{RuntimeError, RuntimeResult};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct SlotCounter {
    capacity: usize,
    used: AtomicUsize,
}

impl SlotCounter {
    fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .is_ok()
    }

    /// Returns `false` if the counter was already at zero.
    fn release(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_sub(1)
            })
            .is_ok()
    }
}

/// Point-in-time usage of one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub used: usize,
    pub capacity: usize,
}

impl SlotUsage {
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }
}

pub struct CapacityRegistry {
    executors: DashMap<ExecutorId, Arc<SlotCounter>>,
}

impl CapacityRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executors: DashMap::new(),
        })
    }

    pub fn add_executor(&self, executor: ExecutorId, capacity: usize) -> RuntimeResult<()> {
        match self.executors.entry(executor) {
            Entry::Occupied(occupied) => Err(RuntimeError::DuplicateExecutor(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                tracing::debug!("Capacity registry: {} with {} slots", vacant.key(), capacity);
                vacant.insert(Arc::new(SlotCounter {
                    capacity,
                    used: AtomicUsize::new(0),
                }));
                Ok(())
            }
        }
    }

    /// Forgets an executor. Outstanding reservations against it become no-ops.
    pub fn remove_executor(&self, executor: &ExecutorId) -> bool {
        self.executors.remove(executor).is_some()
    }

    /// Takes one slot iff `used < capacity`.
    pub fn reserve(&self, executor: &ExecutorId) -> bool {
        match self.counter(executor) {
            Some(counter) => counter.try_acquire(),
            None => false,
        }
    }

    /// Gives one slot back. Never goes below zero.
    pub fn release(&self, executor: &ExecutorId) {
        match self.counter(executor) {
            Some(counter) => {
                if !counter.release() {
                    tracing::warn!("Release on {} without a matching reservation", executor);
                }
            }
            None => {
                tracing::debug!("Release on unregistered executor {} ignored", executor);
            }
        }
    }

    /// Reserves a slot and ties its release to the lifetime of the returned guard.
    pub fn try_reserve(&self, executor: &ExecutorId) -> Option<SlotReservation> {
        let counter = self.counter(executor)?;
        if !counter.try_acquire() {
            return None;
        }

        Some(SlotReservation {
            executor: executor.clone(),
            counter,
        })
    }

    /// Usage of every executor, ordered by ascending id.
    pub fn snapshot(&self) -> BTreeMap<ExecutorId, SlotUsage> {
        self.executors
            .iter()
            .map(|entry| {
                let counter = entry.value();
                (
                    entry.key().clone(),
                    SlotUsage {
                        used: counter.used.load(Ordering::Acquire),
                        capacity: counter.capacity,
                    },
                )
            })
            .collect()
    }

    pub fn usage(&self, executor: &ExecutorId) -> Option<SlotUsage> {
        self.counter(executor).map(|counter| SlotUsage {
            used: counter.used.load(Ordering::Acquire),
            capacity: counter.capacity,
        })
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    fn counter(&self, executor: &ExecutorId) -> Option<Arc<SlotCounter>> {
        self.executors
            .get(executor)
            .map(|entry| entry.value().clone())
    }
}

/// A held slot. Dropping it releases the slot exactly once.
///
/// The guard keeps the counter it was taken from, so a reservation that outlives its
/// executor (removed, then re-registered under the same id) can never free a slot of
/// the new registration.
pub struct SlotReservation {
    executor: ExecutorId,
    counter: Arc<SlotCounter>,
}

impl SlotReservation {
    pub fn executor(&self) -> &ExecutorId {
        &self.executor
    }
}

impl std::fmt::Debug for SlotReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotReservation")
            .field("executor", &self.executor)
            .finish()
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.counter.release() {
            tracing::warn!("Slot on {} was already free", self.executor);
        }
    }
}
