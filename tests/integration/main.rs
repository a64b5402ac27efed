//! Sluice integration test harness.
//!
//! Each test starts the real API router on an ephemeral loopback port and
//! talks to it over HTTP:
//!
//!   cargo test --test integration
//!
//! Servers are per-test and shut down when their handle drops, so tests
//! never share buckets.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use tokio::sync::oneshot;

use sluice_api::ApiState;
use sluice_core::config::{ClassConfig, DEFAULT_CLASS};
use sluice_core::{Collector, RuleTable, SluiceConfig};

mod admin;
mod limiter;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running API server bound to 127.0.0.1:<random>.
pub struct TestServer {
    pub base: String,
    pub collector: Arc<Collector>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        reqwest::get(self.url(path))
            .await
            .with_context(|| format!("GET {path} failed"))
    }

    /// GET with extra headers, e.g. `user-type` or `x-forwarded-for`.
    pub async fn get_with(&self, path: &str, headers: &[(&str, &str)]) -> Result<Response> {
        let mut req = reqwest::Client::new().get(self.url(path));
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        req.send()
            .await
            .with_context(|| format!("GET {path} failed"))
    }

    pub async fn post(&self, path: &str) -> Result<serde_json::Value> {
        reqwest::Client::new()
            .post(self.url(path))
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?
            .json()
            .await
            .context("failed to parse response")
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value> {
        reqwest::Client::new()
            .delete(self.url(path))
            .send()
            .await
            .with_context(|| format!("DELETE {path} failed"))?
            .json()
            .await
            .context("failed to parse response")
    }
}

/// Start a server with the given rule table.
pub async fn spawn_server(rules: RuleTable, admin: bool) -> Result<TestServer> {
    let collector = Arc::new(Collector::new(false));
    let state = ApiState::new(collector.clone(), Arc::new(rules));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = sluice_api::serve_on(listener, state, admin, shutdown).await {
            eprintln!("test server failed: {e}");
        }
    });

    Ok(TestServer {
        base: format!("http://{addr}"),
        collector,
        shutdown: Some(shutdown_tx),
    })
}

/// Rule table whose default class charges `amount` against `capacity`,
/// leaking at `rate` per second.
pub fn rules(amount: u64, capacity: u64, rate: f64) -> RuleTable {
    rules_with(&[(DEFAULT_CLASS, amount, capacity, rate)])
}

/// Rule table from (class, amount, capacity, rate) rows. The first row
/// must be the default class.
pub fn rules_with(rows: &[(&str, u64, u64, f64)]) -> RuleTable {
    let mut config = SluiceConfig::default();
    config.rules.classes.clear();
    for &(name, amount, capacity, rate) in rows {
        config.rules.classes.insert(
            name.to_string(),
            ClassConfig {
                amount,
                capacity: Some(capacity),
                rate: Some(rate),
            },
        );
    }
    RuleTable::from_config(&config.limiter, &config.rules).expect("test rules must be valid")
}

pub fn header_u64(resp: &Response, name: &str) -> Option<u64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_starts_with_empty_collector() {
    let server = spawn_server(rules(1, 5, 1.0), true).await.unwrap();

    let resp = server.get("/api/status").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["buckets"], 0);
    assert_eq!(body["pruning"], false);
    assert_eq!(body["default_class"], DEFAULT_CLASS);
    assert_eq!(body["classes"][0]["capacity"], 5);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let server = spawn_server(rules(1, 5, 1.0), true).await.unwrap();
    let resp = server.get("/api/nope").await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(server.collector.is_empty());
}
