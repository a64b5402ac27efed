use std::time::Duration;

use crate::*;

const PING: &str = "/api/ping";

fn local_key() -> String {
    sluice_api::identify::client_key("127.0.0.1", PING)
}

#[tokio::test]
async fn test_inspect_bucket() {
    let server = spawn_server(rules(1000, 3000, 1.0), true).await.unwrap();
    server.get(PING).await.unwrap();

    let resp = server
        .get(&format!("/api/buckets/{}", local_key()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["key"], local_key());
    assert_eq!(body["capacity"], 3000);
    assert_eq!(body["rate"], 1.0);
    let count = body["count"].as_u64().unwrap();
    assert!((990..=1000).contains(&count), "count {count}");
    assert_eq!(body["remaining"].as_u64().unwrap(), 3000 - count);
    let till = body["till_empty_ms"].as_u64().unwrap();
    assert!(till > 990_000 && till <= 1_000_000, "till_empty_ms {till}");

    let resp = server.get("/api/buckets/nonexistent").await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remove_bucket_restores_access() {
    let server = spawn_server(rules(1000, 1000, 1.0), true).await.unwrap();

    assert_eq!(server.get(PING).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        server.get(PING).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let path = format!("/api/buckets/{}", local_key());
    let body = server.delete(&path).await.unwrap();
    assert_eq!(body["removed"], true);
    assert_eq!(server.collector.count(&local_key()), 0);

    assert_eq!(server.get(PING).await.unwrap().status(), StatusCode::OK);

    let body = server.delete("/api/buckets/nonexistent").await.unwrap();
    assert_eq!(body["removed"], false);
}

#[tokio::test]
async fn test_prune_drops_drained_buckets() {
    // One unit at 1000/s drains in a millisecond.
    let server = spawn_server(rules(1, 1, 1000.0), true).await.unwrap();
    server.get(PING).await.unwrap();
    assert_eq!(server.collector.len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let body = server.post("/api/prune").await.unwrap();
    assert_eq!(body["pruned"], 1);
    assert!(server.collector.is_empty());
}

#[tokio::test]
async fn test_prune_keeps_draining_buckets() {
    let server = spawn_server(rules(1000, 1000, 1.0), true).await.unwrap();
    server.get(PING).await.unwrap();

    let body = server.post("/api/prune").await.unwrap();
    assert_eq!(body["pruned"], 0);
    assert_eq!(server.collector.len(), 1);
}

#[tokio::test]
async fn test_reset_clears_all_buckets() {
    let server = spawn_server(rules(1, 100, 1.0), true).await.unwrap();
    for client in ["192.0.2.1", "192.0.2.2", "192.0.2.3"] {
        server
            .get_with(PING, &[("x-forwarded-for", client)])
            .await
            .unwrap();
    }
    assert_eq!(server.collector.len(), 3);

    let body = server.post("/api/reset").await.unwrap();
    assert_eq!(body["cleared"], 3);
    assert!(server.collector.is_empty());

    let status: serde_json::Value = server.get("/api/status").await.unwrap().json().await.unwrap();
    assert_eq!(status["buckets"], 0);
}

#[tokio::test]
async fn test_admin_routes_hidden_when_disabled() {
    let server = spawn_server(rules(1, 100, 1.0), false).await.unwrap();

    let resp = server.get("/api/buckets/anything").await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = reqwest::Client::new()
        .post(server.url("/api/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // The limited route is still served.
    assert_eq!(server.get(PING).await.unwrap().status(), StatusCode::OK);
}
