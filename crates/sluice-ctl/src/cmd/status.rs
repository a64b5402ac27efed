//! Daemon status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct StatusResponse {
    buckets: usize,
    pruning: bool,
    default_class: String,
    classes: Vec<ClassInfo>,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct ClassInfo {
    name: String,
    amount: u64,
    capacity: u64,
    rate: f64,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Sluice Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Live buckets  : {}", resp.buckets);
    println!("  Auto-pruning  : {}", if resp.pruning { "on" } else { "off" });
    println!("  Uptime        : {}s", resp.uptime_secs);

    println!("\n  Classes:");
    for c in &resp.classes {
        let marker = if c.name == resp.default_class { " (default)" } else { "" };
        println!("  ┌─ {}{}", c.name, marker);
        println!("  │  amount   : {}", c.amount);
        println!("  │  capacity : {}", c.capacity);
        println!("  └─ rate     : {}/s", c.rate);
    }

    Ok(())
}
