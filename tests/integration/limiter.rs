use crate::*;

const PING: &str = "/api/ping";

/// 1000 per request against 3000, leaking 1/s: three requests fit and the
/// few units that leak during a test never make room for a fourth.
fn three_requests() -> RuleTable {
    rules(1000, 3000, 1.0)
}

#[tokio::test]
async fn test_requests_pass_until_bucket_is_full() {
    let server = spawn_server(three_requests(), true).await.unwrap();

    for i in 0..3 {
        let resp = server.get(PING).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "request {i} should pass");
        assert_eq!(header_u64(&resp, "x-ratelimit-admitted"), Some(1000));
        let remaining = header_u64(&resp, "x-ratelimit-remaining").unwrap();
        assert!(remaining <= 3000 - 1000 * (i + 1) + 10, "remaining {remaining}");

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["pong"], true);
    }

    let resp = server.get(PING).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // Room for 1000 more needs about 1000 units to leak at 1/s.
    let retry = header_u64(&resp, "retry-after").expect("missing Retry-After");
    assert!((900..=1100).contains(&retry), "retry-after {retry}");

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Try again after sometime!");
}

#[tokio::test]
async fn test_partial_admission_is_throttled_but_charged() {
    let server = spawn_server(rules(1000, 2500, 1.0), true).await.unwrap();

    assert_eq!(server.get(PING).await.unwrap().status(), StatusCode::OK);
    assert_eq!(server.get(PING).await.unwrap().status(), StatusCode::OK);

    // Only ~500 fits: the request is refused, the 500 stays in the bucket.
    let resp = server.get(PING).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let key = sluice_api::identify::client_key("127.0.0.1", PING);
    let count = server.collector.count(&key);
    assert!((2400..=2500).contains(&count), "count {count}");
}

#[tokio::test]
async fn test_clients_have_independent_buckets() {
    let server = spawn_server(three_requests(), true).await.unwrap();

    for client in ["203.0.113.1", "203.0.113.2"] {
        let xff = [("x-forwarded-for", client)];
        for _ in 0..3 {
            let resp = server.get_with(PING, &xff).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{client} throttled early");
        }
        let resp = server.get_with(PING, &xff).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    assert_eq!(server.collector.len(), 2);
}

#[tokio::test]
async fn test_user_type_selects_rule() {
    let rules = rules_with(&[(DEFAULT_CLASS, 1000, 1000, 1.0), ("premium", 1, 1000, 1.0)]);
    let server = spawn_server(rules, true).await.unwrap();

    let general = [("x-forwarded-for", "198.51.100.1")];
    assert_eq!(server.get_with(PING, &general).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        server.get_with(PING, &general).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let premium = [("x-forwarded-for", "198.51.100.2"), ("user-type", "premium")];
    for _ in 0..20 {
        let resp = server.get_with(PING, &premium).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header_u64(&resp, "x-ratelimit-admitted"), Some(1));
    }

    // Unknown classes are charged like the default class.
    let stranger = [("x-forwarded-for", "198.51.100.3"), ("user-type", "who")];
    let resp = server.get_with(PING, &stranger).await.unwrap();
    assert_eq!(header_u64(&resp, "x-ratelimit-admitted"), Some(1000));
}

#[tokio::test]
async fn test_status_is_not_rate_limited() {
    let server = spawn_server(rules(1000, 1000, 1.0), true).await.unwrap();

    for _ in 0..20 {
        let resp = server.get("/api/status").await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert!(server.collector.is_empty());
}
