//! Discovery handlers. Results arrive on `GET /api/events`, not in the reply.

use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use super::{ApiResult, ok};
use crate::gate::run_gated;

use super::super::state::AppState;

/// Handle POST /api/scan/start
pub async fn start(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let discovery = state.discovery.clone();
    run_gated(state.gate.as_ref(), "scan", || async move {
        discovery.start_scan().await
    })
    .await?;
    Ok(ok())
}

/// Handle POST /api/scan/stop
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stopped = state.discovery.stop_scan().await;
    Json(json!({ "success": true, "stopped": stopped }))
}
