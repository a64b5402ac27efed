//! CLI command modules.

pub mod buckets;
pub mod http;
pub mod status;
