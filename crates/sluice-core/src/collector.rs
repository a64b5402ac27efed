//! Keyed leaky buckets behind one lock.
//!
//! Callers never hold a bucket. They address buckets by a string key (client
//! IP, user id, route hash) and the collector creates them on first use.
//!
//! Buckets live in a dense arena. The key map and the heap both store arena
//! slots; each bucket caches its heap position. The heap is ordered by
//! `empty_at`, so the root is always the bucket that went idle first and
//! pruning can stop at the first root that is still draining.
//!
//! One `Mutex` covers map, heap and buckets. Every operation holds it for
//! its whole body and nothing inside it blocks. Sharding by key hash into
//! several collectors is the way to scale past contention on that lock; a
//! per-bucket lock cannot keep the heap ordered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bucket::{BucketError, LeakyBucket};
use crate::clock::{Clock, SystemClock};
use crate::heap::{HeapArena, IndexedHeap};

/// Prune interval used by `Collector::new(true)`.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

const INITIAL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PruneError {
    #[error("periodic pruning needs a tokio runtime")]
    NoRuntime,
    #[error("periodic pruning is already running")]
    AlreadyRunning,
    #[error("collector has been freed")]
    Freed,
    #[error("prune interval must be non-zero")]
    ZeroInterval,
}

/// Point-in-time view of one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub key: String,
    pub count: u64,
    pub capacity: u64,
    pub rate: f64,
    pub till_empty: Duration,
}

// ── State ─────────────────────────────────────────────────────────────────────

impl HeapArena for [LeakyBucket] {
    type Priority = Instant;

    fn priority(&self, slot: usize) -> Instant {
        self[slot].empty_at()
    }

    fn set_heap_index(&mut self, slot: usize, index: usize) {
        self[slot].heap_index = index;
    }
}

struct State {
    buckets: Vec<LeakyBucket>,
    slots: HashMap<String, usize>,
    heap: IndexedHeap,
}

impl State {
    fn new() -> Self {
        Self {
            buckets: Vec::with_capacity(INITIAL_CAPACITY),
            slots: HashMap::with_capacity(INITIAL_CAPACITY),
            heap: IndexedHeap::with_capacity(INITIAL_CAPACITY),
        }
    }

    fn get(&self, key: &str) -> Option<&LeakyBucket> {
        self.slots.get(key).map(|&slot| &self.buckets[slot])
    }

    fn insert(&mut self, bucket: LeakyBucket) -> usize {
        let slot = self.buckets.len();
        self.slots.insert(bucket.key().to_owned(), slot);
        self.buckets.push(bucket);
        self.heap.push(self.buckets.as_mut_slice(), slot);
        slot
    }

    fn admit(&mut self, slot: usize, amount: u64, now: Instant) -> u64 {
        let admitted = self.buckets[slot].add(amount, now);
        if admitted > 0 {
            let index = self.buckets[slot].heap_index;
            self.heap.fix(self.buckets.as_mut_slice(), index);
        }
        admitted
    }

    /// Drop the bucket at `slot` from heap, map and arena.
    fn remove_slot(&mut self, slot: usize) -> LeakyBucket {
        let index = self.buckets[slot].heap_index;
        self.heap.remove_at(self.buckets.as_mut_slice(), index);

        let bucket = self.buckets.swap_remove(slot);
        self.slots.remove(bucket.key());

        // The former last bucket now lives at `slot`.
        if let Some(moved) = self.buckets.get(slot) {
            self.heap.relocate(moved.heap_index, slot);
            if let Some(entry) = self.slots.get_mut(moved.key()) {
                *entry = slot;
            }
        }
        bucket
    }

    fn snapshot(&self, slot: usize, now: Instant) -> BucketSnapshot {
        let b = &self.buckets[slot];
        BucketSnapshot {
            key: b.key().to_owned(),
            count: b.count(now),
            capacity: b.capacity(),
            rate: b.rate(),
            till_empty: b.till_empty(now),
        }
    }

    /// Slot for `key`, creating its bucket if absent.
    fn slot_or_insert(
        &mut self,
        key: &str,
        capacity: u64,
        rate: f64,
        now: Instant,
    ) -> Result<usize, BucketError> {
        if let Some(&slot) = self.slots.get(key) {
            return Ok(slot);
        }
        let bucket = LeakyBucket::new(key, capacity, rate, now)?;
        tracing::trace!(key, capacity, rate, "bucket created");
        Ok(self.insert(bucket))
    }

    fn prune(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(slot) = self.heap.peek_min() {
            // Nothing below the root can be more idle than the root.
            if !self.buckets[slot].till_empty(now).is_zero() {
                break;
            }
            self.remove_slot(slot);
            removed += 1;
        }
        removed
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.slots.len(), self.buckets.len());
        assert_eq!(self.heap.len(), self.buckets.len());
        for (key, &slot) in &self.slots {
            let bucket = &self.buckets[slot];
            assert_eq!(bucket.key(), key);
            assert_eq!(self.heap.get(bucket.heap_index), Some(slot));
        }
        if let Some(root) = self.heap.peek_min() {
            let min = self.buckets.iter().map(LeakyBucket::empty_at).min();
            assert_eq!(Some(self.buckets[root].empty_at()), min);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every mutation leaves the state consistent before anything can panic.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Collector ─────────────────────────────────────────────────────────────────

enum Pruner {
    Idle,
    Running(JoinHandle<()>),
    Freed,
}

/// Thread-safe set of keyed leaky buckets.
///
/// Capacity and rate are taken from the first `add` for a key and ignored
/// afterwards. To change them, `remove` the key and add again.
pub struct Collector {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    shutdown_tx: broadcast::Sender<()>,
    pruner: Mutex<Pruner>,
}

impl Collector {
    /// Create an empty collector on the system clock.
    ///
    /// With `delete_empty_buckets`, a background task prunes idle buckets
    /// every `DEFAULT_PRUNE_INTERVAL`. That task needs a tokio runtime;
    /// outside one the collector still works, it just never prunes on its
    /// own.
    pub fn new(delete_empty_buckets: bool) -> Self {
        let collector = Self::with_clock(SystemClock);
        if delete_empty_buckets {
            if let Err(e) = collector.periodic_prune(DEFAULT_PRUNE_INTERVAL) {
                tracing::warn!(error = %e, "automatic bucket pruning disabled");
            }
        }
        collector
    }

    /// Create an empty collector reading time from `clock`. No pruning task
    /// is started.
    pub fn with_clock(clock: impl Clock) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Arc::new(Mutex::new(State::new())),
            clock: Arc::new(clock),
            shutdown_tx,
            pruner: Mutex::new(Pruner::Idle),
        }
    }

    /// Amount outstanding in the bucket for `key`. Unknown keys are empty.
    pub fn count(&self, key: &str) -> u64 {
        let state = lock(&self.state);
        state
            .get(key)
            .map_or(0, |b| b.count(self.clock.now()))
    }

    /// Time until the bucket for `key` is empty. Unknown keys are empty.
    pub fn till_empty(&self, key: &str) -> Duration {
        let state = lock(&self.state);
        state
            .get(key)
            .map_or(Duration::ZERO, |b| b.till_empty(self.clock.now()))
    }

    pub fn snapshot(&self, key: &str) -> Option<BucketSnapshot> {
        let state = lock(&self.state);
        let now = self.clock.now();
        state.slots.get(key).map(|&slot| state.snapshot(slot, now))
    }

    /// Delete the bucket for `key`. Returns false if there was none.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = lock(&self.state);
        match state.slots.get(key).copied() {
            Some(slot) => {
                state.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Add `amount` to the bucket for `key`, up to its capacity, and return
    /// how much was admitted. Less than `amount` means the bucket filled up;
    /// zero means it was already full.
    ///
    /// An unknown key gets a new bucket with `capacity` and `rate`. For a
    /// known key both are ignored.
    pub fn add(&self, key: &str, amount: u64, capacity: u64, rate: f64) -> Result<u64, BucketError> {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        let slot = state.slot_or_insert(key, capacity, rate, now)?;
        Ok(state.admit(slot, amount, now))
    }

    /// `add`, plus a snapshot of the bucket taken under the same lock. No
    /// prune, remove or reset can land between the admission and the read.
    pub fn add_with_snapshot(
        &self,
        key: &str,
        amount: u64,
        capacity: u64,
        rate: f64,
    ) -> Result<(u64, BucketSnapshot), BucketError> {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        let slot = state.slot_or_insert(key, capacity, rate, now)?;
        let admitted = state.admit(slot, amount, now);
        Ok((admitted, state.snapshot(slot, now)))
    }

    /// Remove every bucket that has drained. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        state.prune(now)
    }

    /// Drop all buckets. Returns how many there were.
    pub fn reset(&self) -> usize {
        let mut state = lock(&self.state);
        let cleared = state.buckets.len();
        *state = State::new();
        cleared
    }

    pub fn len(&self) -> usize {
        lock(&self.state).buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a pruning task is currently running.
    pub fn is_pruning(&self) -> bool {
        matches!(&*lock(&self.pruner), Pruner::Running(task) if !task.is_finished())
    }

    /// Reset, then stop the pruning task. Pruning cannot be restarted on
    /// this collector afterwards.
    pub fn free(&self) {
        let cleared = self.reset();
        let mut pruner = lock(&self.pruner);
        if matches!(*pruner, Pruner::Running(_)) {
            // No receiver just means the task already exited.
            let _ = self.shutdown_tx.send(());
        }
        *pruner = Pruner::Freed;
        tracing::debug!(cleared, "collector freed");
    }

    /// Spawn a task that calls `prune` every `interval` until `free` is
    /// called or the collector is dropped.
    pub fn periodic_prune(&self, interval: Duration) -> Result<(), PruneError> {
        if interval.is_zero() {
            return Err(PruneError::ZeroInterval);
        }

        let mut pruner = lock(&self.pruner);
        match &*pruner {
            Pruner::Freed => return Err(PruneError::Freed),
            Pruner::Running(task) if !task.is_finished() => {
                return Err(PruneError::AlreadyRunning)
            }
            _ => {}
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PruneError::NoRuntime)?;
        let task = runtime.spawn(prune_loop(
            self.state.clone(),
            self.clock.clone(),
            interval,
            self.shutdown_tx.subscribe(),
        ));
        *pruner = Pruner::Running(task);

        tracing::debug!(interval_ms = interval.as_millis() as u64, "bucket pruning started");
        Ok(())
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("buckets", &self.len())
            .field("pruning", &self.is_pruning())
            .finish()
    }
}

/// Prune on every tick. Exits when the shutdown channel fires or closes;
/// dropping the collector drops the sender, so the task never outlives it.
async fn prune_loop(
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = {
                    let mut state = lock(&state);
                    let now = clock.now();
                    state.prune(now)
                };
                if removed > 0 {
                    tracing::debug!(removed, "pruned idle buckets");
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("bucket pruning stopped");
                return;
            }
        }
    }
}
