//! Rate-limit middleware.
//!
//! Each request is charged its class's `amount` against the bucket for its
//! client key. A request goes through only if the whole amount was
//! admitted; anything less means the bucket is saturated and the request
//! is turned away with 429. The partial amount stays charged.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, OriginalUri, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sluice_core::{BucketSnapshot, Rule};

use crate::handlers::ApiState;
use crate::identify::{client_ip, client_key};

/// Request header carrying the caller classification.
pub const USER_TYPE_HEADER: &str = "user-type";

pub const ADMITTED_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-admitted");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const THROTTLED_MESSAGE: &str = "Try again after sometime!";

#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

pub async fn rate_limit(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let class = request
        .headers()
        .get(USER_TYPE_HEADER)
        .and_then(|v| v.to_str().ok());
    let (class, rule) = state.rules.resolve(class);

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    // Nested routers see a stripped path; key on the one the client sent.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().path().to_owned(), |uri| uri.0.path().to_owned());
    let key = client_key(&ip, &path);

    let (admitted, snapshot) = match state
        .collector
        .add_with_snapshot(&key, rule.amount, rule.capacity, rule.rate)
    {
        Ok(charged) => charged,
        Err(e) => {
            tracing::error!(error = %e, class, "bucket rejected rule parameters");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    if admitted < rule.amount {
        let wait = wait_for_room(&snapshot, rule);
        tracing::debug!(
            ip = %ip,
            class,
            admitted,
            wait_ms = wait.as_millis() as u64,
            "request throttled"
        );

        let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, THROTTLED_MESSAGE.into());
        // Whole seconds, rounded up.
        let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let remaining = snapshot.capacity - snapshot.count;

    let mut response = next.run(request).await;
    set_limit_headers(response.headers_mut(), admitted, remaining);
    response
}

/// Time until the bucket has room for a full `rule.amount` again.
///
/// Config rejects classes whose amount exceeds their capacity, but a key
/// keeps the capacity of the class that created its bucket. A bucket too
/// small for this rule only goes away once it drains and is pruned, so
/// report the time to empty.
fn wait_for_room(snapshot: &BucketSnapshot, rule: &Rule) -> Duration {
    let Some(headroom) = snapshot.capacity.checked_sub(rule.amount) else {
        return snapshot.till_empty;
    };
    let drained_enough = Duration::try_from_secs_f64(headroom as f64 / snapshot.rate)
        .unwrap_or(Duration::MAX);
    snapshot.till_empty.saturating_sub(drained_enough)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { message })).into_response()
}

fn set_limit_headers(headers: &mut HeaderMap, admitted: u64, remaining: u64) {
    headers.insert(ADMITTED_HEADER, HeaderValue::from(admitted));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
}
