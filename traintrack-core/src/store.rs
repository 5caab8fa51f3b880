//! Authoritative latest-state table per train, with synchronous pub/sub.
//!
//! The store is the single shared mutable resource in the system. It is
//! constructed once at process start and handed by `Arc` to both the
//! ingestion bridge and the broadcast server; there is no module-level
//! singleton.
//!
//! `update` serializes all mutations behind one lock and notifies every
//! registered observer before returning, so per-train ordering is exactly
//! arrival order. Observers live in their own registry keyed by
//! subscription id; unsubscribing is O(1) and safe from inside a callback
//! (it takes effect on the next update).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::types::*;

/// A movement reading this close in time to a later position reading is
/// treated as referring to the same train (advisory linkage only).
const LINK_WINDOW_SECS: i64 = 15;

type ObserverFn = dyn Fn(&TrainState) + Send + Sync;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct StoreInner {
    trains: HashMap<String, TrainState>,
    /// Most recent movement update, for best-effort position linkage.
    last_movement: Option<(String, DateTime<Utc>)>,
}

/// In-memory table of the latest known state per train.
pub struct TrainStore {
    inner: Mutex<StoreInner>,
    observers: RwLock<HashMap<u64, Arc<ObserverFn>>>,
    next_subscription: AtomicU64,
}

impl TrainStore {
    pub fn new() -> Self {
        TrainStore {
            inner: Mutex::new(StoreInner {
                trains: HashMap::new(),
                last_movement: None,
            }),
            observers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Apply one reading: create or merge the train state, then notify all
    /// observers synchronously with the merged state.
    ///
    /// Merging is last-writer-wins per field group: movement readings only
    /// touch movement fields, position readings only touch position fields.
    /// Readings are applied in arrival order, never reordered by timestamp.
    pub fn update(&self, reading: Reading) -> TrainState {
        let mut inner = self.inner.lock().unwrap();

        let state = match reading {
            Reading::Movement(m) => {
                let id = m.train_number.to_string();
                let state = inner
                    .trains
                    .entry(id.clone())
                    .or_insert_with(|| TrainState::new(id.clone(), m.captured_at));
                state.train_number = Some(m.train_number);
                state.status = if m.speed_kmh == 0 {
                    TrainStatus::Stopped
                } else {
                    TrainStatus::Active
                };
                state.updated_at = m.captured_at;
                state.movement = Some(m.clone());
                let state = state.clone();
                inner.last_movement = Some((id, m.captured_at));
                state
            }
            Reading::Position(p) => {
                let id = inner
                    .linked_train(p.captured_at)
                    .unwrap_or_else(|| synthetic_id(&p));
                let state = inner
                    .trains
                    .entry(id.clone())
                    .or_insert_with(|| TrainState::new(id, p.captured_at));
                state.updated_at = p.captured_at;
                state.position = Some(p);
                state.clone()
            }
        };

        // Snapshot the registry, then invoke without holding its lock so a
        // callback may unsubscribe. The store lock stays held: updates and
        // their notifications are strictly serialized.
        let observers: Vec<Arc<ObserverFn>> =
            self.observers.read().unwrap().values().cloned().collect();
        for observer in observers {
            observer(&state);
        }

        state
    }

    /// All known train states, most recently updated first.
    pub fn get_all(&self) -> Vec<TrainState> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<TrainState> = inner.trains.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn get_one(&self, id: &str) -> Option<TrainState> {
        self.inner.lock().unwrap().trains.get(id).cloned()
    }

    /// Remove a train. The ingestion path never calls this; clients may.
    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().unwrap().trains.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an observer fired once per successful `update`, before
    /// that `update` returns.
    ///
    /// Callbacks run with the store lock held, keeping notification order
    /// identical to update order. A callback must therefore not call back
    /// into `update`, `get_all`, `get_one`, `remove`, `len` or `is_empty`;
    /// that would deadlock. `subscribe` and `unsubscribe` remain safe to
    /// call from inside a callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TrainState) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.observers
            .write()
            .unwrap()
            .insert(id, Arc::new(callback));
        SubscriptionId(id)
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.write().unwrap().remove(&id.0).is_some()
    }

    /// Number of live subscriptions (teardown accounting).
    pub fn subscriber_count(&self) -> usize {
        self.observers.read().unwrap().len()
    }
}

impl Default for TrainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreInner {
    /// Best-effort linkage: a position reading close enough to the latest
    /// movement reading belongs to that train. Absence is normal.
    fn linked_train(&self, captured_at: DateTime<Utc>) -> Option<String> {
        let (id, at) = self.last_movement.as_ref()?;
        if (captured_at - *at).abs() <= Duration::seconds(LINK_WINDOW_SECS) {
            Some(id.clone())
        } else {
            None
        }
    }
}

/// Identifier for a position reading with no movement reading to link to.
fn synthetic_id(p: &PositionReading) -> String {
    format!(
        "pos-{}-{:.4}-{:.4}",
        p.captured_at.timestamp(),
        p.wgs84.lat,
        p.wgs84.lon
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
