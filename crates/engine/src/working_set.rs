//! In-process working copy of the strategy table.
//!
//! Reads take a snapshot under a short `std::sync::RwLock` section that is
//! never held across an `.await`. Mutations of one strategy are serialized by
//! that strategy's entry in the lock table, which callers hold across the
//! write-through to the store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use common::{page, Strategy, StrategyFilter};

#[derive(Debug, Clone)]
struct Entry {
    strategy: Strategy,
    /// Local changes the store has not acknowledged.
    dirty: bool,
    /// Latest `last_signal_time` the store is known to hold.
    durable_signal_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct WorkingSet {
    entries: RwLock<HashMap<String, Entry>>,
    pending_deletes: RwLock<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held mutation lock for one strategy. Dropping it releases the lock and
/// removes the table entry once nobody else holds or awaits it.
pub struct StrategyGuard<'a> {
    set: &'a WorkingSet,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StrategyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.set.release_idle_locks();
    }
}

impl WorkingSet {
    /// Serialize mutations of `id` until the guard is dropped.
    pub async fn lock(&self, id: &str) -> StrategyGuard<'_> {
        let mutex = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .clone();
        let mut held = StrategyGuard {
            set: self,
            guard: None,
        };
        held.guard = Some(mutex.lock_owned().await);
        held
    }

    /// Live entries in the lock table.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every entry nobody holds or awaits. Entries left behind by
    /// cancelled waiters go with the next release.
    fn release_idle_locks(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn get(&self, id: &str) -> Option<Strategy> {
        self.read().get(id).map(|e| e.strategy.clone())
    }

    /// Copy suitable for writing to the store: `last_signal_time` is capped
    /// at what the store already acknowledged.
    pub fn persistable(&self, id: &str) -> Option<Strategy> {
        self.read().get(id).map(|e| {
            let mut s = e.strategy.clone();
            s.last_signal_time = e.durable_signal_time;
            s
        })
    }

    /// Insert or replace a strategy. `dirty` marks it as not yet persisted.
    pub fn put(&self, strategy: Strategy, dirty: bool) {
        let mut entries = self.write();
        let durable_signal_time = entries
            .get(&strategy.id)
            .map_or(if dirty { None } else { strategy.last_signal_time }, |e| {
                e.durable_signal_time
            });
        entries.insert(
            strategy.id.clone(),
            Entry {
                strategy,
                dirty,
                durable_signal_time,
            },
        );
    }

    /// Insert a strategy loaded from the store unless a local copy exists.
    pub fn put_clean_if_absent(&self, strategy: Strategy) -> bool {
        if self.is_pending_delete(&strategy.id) {
            return false;
        }
        let mut entries = self.write();
        if entries.contains_key(&strategy.id) {
            return false;
        }
        entries.insert(
            strategy.id.clone(),
            Entry {
                durable_signal_time: strategy.last_signal_time,
                strategy,
                dirty: false,
            },
        );
        true
    }

    /// Apply `f` to the strategy in place. Returns `None` if absent.
    pub fn update<R>(&self, id: &str, dirty: bool, f: impl FnOnce(&mut Strategy) -> R) -> Option<R> {
        let mut entries = self.write();
        let entry = entries.get_mut(id)?;
        let out = f(&mut entry.strategy);
        entry.dirty |= dirty;
        Some(out)
    }

    pub fn mark_clean(&self, id: &str) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.dirty = false;
        }
    }

    pub fn set_durable_signal_time(&self, id: &str, ts: DateTime<Utc>) {
        if let Some(entry) = self.write().get_mut(id) {
            if entry.durable_signal_time.map_or(true, |prev| ts > prev) {
                entry.durable_signal_time = Some(ts);
            }
        }
    }

    /// Strategies whose `last_signal_time` is ahead of the store's copy.
    pub fn signal_time_lagging(&self) -> Vec<(String, DateTime<Utc>)> {
        self.read()
            .values()
            .filter_map(|e| match (e.strategy.last_signal_time, e.durable_signal_time) {
                (Some(local), Some(durable)) if local > durable => Some((e.strategy.id.clone(), local)),
                (Some(local), None) => Some((e.strategy.id.clone(), local)),
                _ => None,
            })
            .collect()
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.read().get(id).is_some_and(|e| e.dirty)
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        self.read()
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.strategy.id.clone())
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<Strategy> {
        self.write().remove(id).map(|e| e.strategy)
    }

    pub fn mark_pending_delete(&self, id: &str) {
        self.pending_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
    }

    pub fn clear_pending_delete(&self, id: &str) {
        self.pending_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn is_pending_delete(&self, id: &str) -> bool {
        self.pending_deletes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn pending_deletes(&self) -> Vec<String> {
        self.pending_deletes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Whether the store is known to be behind this working set.
    pub fn has_pending(&self) -> bool {
        let deletes = !self
            .pending_deletes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        deletes || self.read().values().any(|e| e.dirty)
    }

    /// Filtered and ordered by `created_at DESC, id ASC`.
    pub fn list(&self, filter: &StrategyFilter) -> Vec<Strategy> {
        let mut items: Vec<Strategy> = self
            .read()
            .values()
            .filter(|e| filter.matches(&e.strategy))
            .map(|e| e.strategy.clone())
            .collect();
        page::sort_strategies(&mut items);
        items
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every cached strategy and all pending state.
    pub fn clear(&self) {
        self.write().clear();
        self.pending_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
