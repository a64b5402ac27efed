//! sluice-core: per-key admission control.
//!
//! Leaky buckets addressed by string key, an indexed heap that finds the
//! most idle bucket in O(1), and a collector that ties the two together
//! under one lock. Everything the daemon and API crates build on.

pub mod bucket;
pub mod clock;
pub mod collector;
pub mod config;
pub mod heap;
pub mod rule;

pub use bucket::{BucketError, LeakyBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{BucketSnapshot, Collector, PruneError, DEFAULT_PRUNE_INTERVAL};
pub use config::SluiceConfig;
pub use rule::{Rule, RuleTable};
