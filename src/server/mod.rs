//! # HTTP Server for Printer Connections
//!
//! JSON API over the connection registry and the discovery relay.
//!
//! ## Usage
//!
//! ```bash
//! thermolink serve --listen 0.0.0.0:8080
//! ```
//!
//! ## Routes
//!
//! | Method | Path | Body | Reply |
//! |--------|------|------|-------|
//! | POST | `/api/connections` | `{address, encoding?}` | identity or `null` |
//! | GET | `/api/connections` | | `[identity]` |
//! | DELETE | `/api/connections/:id` | | `{success}` |
//! | GET | `/api/connections/:id/status` | | `{connected}` |
//! | POST | `/api/connections/:id/ops` | `[operation]` | `{success}` |
//! | POST | `/api/connections/:id/begin` | | `{success}` |
//! | POST | `/api/connections/:id/write` | | `{success}` |
//! | POST | `/api/scan/start` | | `{success}` |
//! | POST | `/api/scan/stop` | | `{success, stopped}` |
//! | GET | `/api/events` | | `text/event-stream` of printer events |
//!
//! The per-session routes also exist without an id under
//! `/api/connection` (`DELETE`, `/status`, `/ops`, `/begin`, `/write`).
//! Those address the only session and fail with 400 when there are
//! several.
//!
//! Failures answer `{"success": false, "error": "..."}` with a status
//! matching the error kind.

mod handlers;
mod state;

pub use handlers::status_for;
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Result, ThermolinkError};

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/connections",
            post(handlers::connections::connect).get(handlers::connections::list),
        )
        .route(
            "/api/connections/:id",
            axum::routing::delete(handlers::connections::disconnect),
        )
        .route(
            "/api/connections/:id/status",
            get(handlers::connections::status),
        )
        .route("/api/connections/:id/ops", post(handlers::connections::apply))
        .route("/api/connections/:id/begin", post(handlers::connections::begin))
        .route("/api/connections/:id/write", post(handlers::connections::write))
        .route(
            "/api/connection",
            axum::routing::delete(handlers::connections::disconnect),
        )
        .route("/api/connection/status", get(handlers::connections::status))
        .route("/api/connection/ops", post(handlers::connections::apply))
        .route("/api/connection/begin", post(handlers::connections::begin))
        .route("/api/connection/write", post(handlers::connections::write))
        .route("/api/events", get(handlers::events::stream))
        .route("/api/scan/start", post(handlers::scan::start))
        .route("/api/scan/stop", post(handlers::scan::stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listen` until the process is stopped.
pub async fn serve(state: Arc<AppState>, listen: &str) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ThermolinkError::Transport(format!("Failed to bind to {}: {}", listen, e)))?;
    info!(%listen, "thermolink HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ThermolinkError::Transport(format!("Server error: {}", e)))?;
    Ok(())
}
