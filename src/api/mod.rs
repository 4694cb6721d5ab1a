//! HTTP front-end for the collector
//!
//! ## Endpoints
//!
//! - `POST /update/` - Merge one JSON metric (sealed envelope)
//! - `POST /updates/` - Merge a JSON batch (sealed envelope)
//! - `POST /update/{type}/{id}/{value}` - Merge one metric from path segments
//! - `POST /value/` - Look up a metric by `{id, type}` (sealed envelope)
//! - `GET /value/{type}/{id}` - Stored value as plain text
//! - `GET /` - HTML listing of all metrics
//! - `GET /ping` - Storage health
//!
//! JSON responses carry a `HashSHA256` header over the uncompressed body when
//! a shared secret is configured.

pub mod error;
pub mod routes;
pub mod sealed;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the collector router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(routes::index::list_metrics))
        .route("/ping", get(routes::health::ping))
        .route("/update/", post(routes::update::update_json))
        .route("/updates/", post(routes::update::update_batch))
        .route("/update/:kind/:id/:value", post(routes::update::update_text))
        .route("/value/", post(routes::value::value_json))
        .route("/value/:kind/:id", get(routes::value::value_text))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Serve the router on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
