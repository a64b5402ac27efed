//! HTTP API handlers: exposes limiter state as JSON.

pub mod buckets;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use sluice_core::{Collector, RuleTable};

#[derive(Clone)]
pub struct ApiState {
    pub collector: Arc<Collector>,
    pub rules: Arc<RuleTable>,
    /// When the daemon started serving. Reported as uptime.
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(collector: Arc<Collector>, rules: Arc<RuleTable>) -> Self {
        Self {
            collector,
            rules,
            started_at: Instant::now(),
        }
    }
}

// Re-export handler functions for use in router setup.
pub use buckets::{handle_bucket_inspect, handle_bucket_remove, handle_prune, handle_reset};
pub use status::{handle_ping, handle_status};
