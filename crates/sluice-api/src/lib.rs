pub mod handlers;
pub mod identify;
pub mod limit;

use std::future::Future;
use std::net::SocketAddr;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Build the application router.
///
/// `/api/ping` sits behind the rate limiter; `/api/status` does not. The
/// bucket management routes are only mounted when `admin` is set.
pub fn router(state: ApiState, admin: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limited = Router::new()
        .route("/ping", get(handlers::handle_ping))
        .route_layer(from_fn_with_state(state.clone(), limit::rate_limit));

    let mut api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .merge(limited);

    if admin {
        api_routes = api_routes
            .route(
                "/buckets/{key}",
                get(handlers::handle_bucket_inspect).delete(handlers::handle_bucket_remove),
            )
            .route("/prune", post(handlers::handle_prune))
            .route("/reset", post(handlers::handle_reset));
    }

    Router::new()
        .nest("/api", api_routes.with_state(state))
        .layer(cors)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    state: ApiState,
    addr: SocketAddr,
    admin: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state, admin, shutdown).await
}

/// Serve on an already-bound listener. Lets callers bind port 0 and read
/// the assigned port first.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: ApiState,
    admin: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state, admin);
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, admin, "API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
