//! Leaky bucket in virtual-scheduling form.
//!
//! A bucket does not tick. It remembers how full it was at its last
//! admission and reads the outstanding amount off the time since then:
//! `level - rate * elapsed`, truncated. Decay therefore costs nothing until
//! someone looks. `empty_at` is the projected instant the level reaches zero
//! and orders buckets for pruning.
//!
//! The level is an integer count of billionths of a unit, so admissions add
//! exactly and the count rises by exactly what was admitted at any rate.
//!
//! Capacity and rate are fixed when the bucket is created. Changing either
//! mid-life would invalidate the time already encoded in `empty_at`.

use std::time::{Duration, Instant};

/// Sub-units per unit of fill.
const SCALE: u128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BucketError {
    #[error("leak rate must be finite and greater than zero, got {0}")]
    InvalidRate(f64),
    #[error("a full bucket of {capacity} at {rate}/s drains past the end of the clock")]
    DrainTimeOverflow { capacity: u64, rate: f64 },
}

/// Admission state for one key.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    key: String,
    capacity: u64,
    /// Units leaked per second.
    rate: f64,
    /// Fill in sub-units as of `updated`.
    level: u128,
    updated: Instant,
    empty_at: Instant,
    /// Position in the collector's heap. Maintained by the heap, never by
    /// the bucket itself.
    pub(crate) heap_index: usize,
}

impl LeakyBucket {
    /// Create an empty bucket.
    pub fn new(
        key: impl Into<String>,
        capacity: u64,
        rate: f64,
        now: Instant,
    ) -> Result<Self, BucketError> {
        Self::check(capacity, rate, now)?;
        Ok(Self {
            key: key.into(),
            capacity,
            rate,
            level: 0,
            updated: now,
            empty_at: now,
            heap_index: 0,
        })
    }

    /// Reject rates that are zero, negative, or not finite, and capacities
    /// whose drain time cannot be represented from `now`.
    pub fn check(capacity: u64, rate: f64, now: Instant) -> Result<(), BucketError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(BucketError::InvalidRate(rate));
        }

        // Truncation on read lets the level approach capacity + 1.
        let full = (u128::from(capacity) + 1) * SCALE;
        drain_time(full, rate)
            .and_then(|d| now.checked_add(d))
            .map(|_| ())
            .ok_or(BucketError::DrainTimeOverflow { capacity, rate })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Projected instant at which the bucket drains to zero.
    pub fn empty_at(&self) -> Instant {
        self.empty_at
    }

    /// Amount currently outstanding, in `[0, capacity]`.
    pub fn count(&self, now: Instant) -> u64 {
        self.units(self.level_at(now))
    }

    /// Time until the bucket is empty. Zero once drained.
    pub fn till_empty(&self, now: Instant) -> Duration {
        self.empty_at.saturating_duration_since(now)
    }

    /// Space left before the bucket is full.
    pub fn remaining(&self, now: Instant) -> u64 {
        self.capacity - self.count(now)
    }

    /// Admit up to `amount` and return how much was admitted.
    ///
    /// Admission is partial: a request larger than the free space fills the
    /// bucket and returns the free space. Zero means the bucket is full.
    pub fn add(&mut self, amount: u64, now: Instant) -> u64 {
        // An idle bucket has leaked down to zero and restarts from now.
        let current = self.level_at(now);
        let admitted = amount.min(self.capacity - self.units(current));
        if admitted == 0 {
            return 0;
        }

        let level = current + u128::from(admitted) * SCALE;
        match drain_time(level, self.rate).and_then(|d| now.checked_add(d)) {
            Some(empty_at) => {
                self.level = level;
                self.updated = now;
                self.empty_at = empty_at;
                admitted
            }
            None => 0,
        }
    }

    /// Fill left at `now` after leaking since the last admission.
    fn level_at(&self, now: Instant) -> u128 {
        let elapsed = now.saturating_duration_since(self.updated).as_nanos();
        // Units per second times nanoseconds is sub-units. `as` saturates.
        let leaked = (self.rate * elapsed as f64) as u128;
        self.level.saturating_sub(leaked)
    }

    fn units(&self, level: u128) -> u64 {
        let whole = level / SCALE;
        u64::try_from(whole).map_or(self.capacity, |n| n.min(self.capacity))
    }
}

/// Time for `level` sub-units to leak at `rate`, rounded up to a whole
/// nanosecond so the bucket is never reported empty while it still holds
/// a fraction.
fn drain_time(level: u128, rate: f64) -> Option<Duration> {
    let nanos = (level as f64 / rate).ceil();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}
