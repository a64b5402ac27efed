//! sluice-ctl: command-line interface for the Sluice daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 8080;

fn print_usage() {
    println!("Usage: sluice-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status          Show daemon status and rule classes");
    println!("  bucket <key>    Inspect the bucket for a client key");
    println!("  remove <key>    Delete the bucket for a client key");
    println!("  prune           Drop every drained bucket now");
    println!("  reset           Drop every bucket");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["bucket", key] => cmd::buckets::cmd_bucket_inspect(port, key).await,
        ["remove", key] => cmd::buckets::cmd_bucket_remove(port, key).await,
        ["prune"] => cmd::buckets::cmd_prune(port).await,
        ["reset"] => cmd::buckets::cmd_reset(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
