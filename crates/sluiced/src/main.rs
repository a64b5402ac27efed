//! sluiced: Sluice rate-limiting daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::{JoinError, JoinHandle};

use sluice_core::{Collector, RuleTable, SluiceConfig};

const STATS_INTERVAL: Duration = Duration::from_secs(30);
/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SluiceConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SluiceConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SluiceConfig::default()
    });
    tracing::info!(path = %SluiceConfig::file_path().display(), "sluiced starting");

    let rules = Arc::new(
        RuleTable::from_config(&config.limiter, &config.rules).context("invalid rule table")?,
    );
    for class in rules.classes() {
        let rule = rules.lookup(class);
        tracing::info!(
            class,
            amount = rule.amount,
            capacity = rule.capacity,
            rate = rule.rate,
            "rule loaded"
        );
    }

    // Collector
    let collector = Arc::new(Collector::new(false));
    if config.limiter.delete_empty_buckets {
        collector
            .periodic_prune(config.limiter.prune_interval())
            .context("failed to start bucket pruning")?;
    }
    tracing::info!(
        delete_empty_buckets = config.limiter.delete_empty_buckets,
        prune_interval_ms = config.limiter.prune_interval_ms,
        "collector ready"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let stats_printer = {
        let collector = collector.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                tracing::debug!(
                    buckets = collector.len(),
                    pruning = collector.is_pruning(),
                    "collector snapshot"
                );
            }
        })
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    let mut api_task = {
        let state = sluice_api::ApiState::new(collector.clone(), rules.clone());
        let mut shutdown_rx = shutdown_tx.subscribe();
        let admin = config.server.admin;
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };
            sluice_api::serve(state, addr, admin, shutdown).await
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    let exited = tokio::select! {
        _ = shutdown_rx.recv() => None,
        r = &mut api_task      => Some(r),
        r = stats_printer      => {
            tracing::error!("stats printer exited: {:?}", r);
            None
        }
    };

    let result = match exited {
        Some(joined) => api_result(joined),
        None => {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
            drain_api(api_task, SHUTDOWN_GRACE).await
        }
    };

    collector.free();
    tracing::info!("collector freed");

    result
}

/// Wait for the API server to finish its graceful shutdown. A server that
/// outlives `grace` is aborted.
async fn drain_api(mut task: JoinHandle<Result<()>>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => api_result(joined),
        Err(_) => {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "API server did not drain in time");
            task.abort();
            Ok(())
        }
    }
}

fn api_result(joined: Result<Result<()>, JoinError>) -> Result<()> {
    joined.context("API task panicked")?.context("API server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_graceful_exit() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        drain_api(task, SHUTDOWN_GRACE).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace() {
        let task = tokio::spawn(std::future::pending::<Result<()>>());
        drain_api(task, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn server_failure_is_an_error() {
        let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap();

        let state = sluice_api::ApiState::new(
            Arc::new(Collector::new(false)),
            Arc::new(RuleTable::default()),
        );
        let task = tokio::spawn(sluice_api::serve(state, addr, false, std::future::pending()));

        let err = drain_api(task, SHUTDOWN_GRACE).await.unwrap_err();
        assert!(format!("{err:#}").contains("API server failed"), "{err:#}");
    }
}
