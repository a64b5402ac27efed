//! Bucket management commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json_optional, post_json};

pub async fn cmd_bucket_inspect(port: u16, key: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct BucketResponse {
        key: String,
        count: u64,
        capacity: u64,
        remaining: u64,
        rate: f64,
        till_empty_ms: u64,
    }

    let url = format!("{}/buckets/{}", base_url(port), key);
    let Some(resp) = get_json_optional::<BucketResponse>(&url).await? else {
        println!("No bucket for {} (empty).", key);
        return Ok(());
    };

    println!("═══════════════════════════════════════");
    println!("  Bucket Details");
    println!("═══════════════════════════════════════");
    println!("  Key        : {}", resp.key);
    println!("  Count      : {} / {}", resp.count, resp.capacity);
    println!("  Remaining  : {}", resp.remaining);
    println!("  Rate       : {}/s", resp.rate);
    println!("  Till empty : {:.3}s", resp.till_empty_ms as f64 / 1000.0);

    Ok(())
}

pub async fn cmd_bucket_remove(port: u16, key: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct RemoveResponse {
        key: String,
        removed: bool,
    }

    let resp: RemoveResponse = delete_json(&format!("{}/buckets/{}", base_url(port), key)).await?;

    if resp.removed {
        println!("✓ Bucket removed: {}", resp.key);
    } else {
        println!("Bucket not found: {}", resp.key);
    }

    Ok(())
}

pub async fn cmd_prune(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct PruneResponse {
        pruned: usize,
    }

    let resp: PruneResponse = post_json(&format!("{}/prune", base_url(port))).await?;
    println!("Pruned {} empty buckets.", resp.pruned);
    Ok(())
}

pub async fn cmd_reset(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ResetResponse {
        cleared: usize,
    }

    let resp: ResetResponse = post_json(&format!("{}/reset", base_url(port))).await?;
    println!("Cleared {} buckets.", resp.cleared);
    Ok(())
}
