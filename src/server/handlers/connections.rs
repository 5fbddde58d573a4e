//! Connection and print-job handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{ApiResult, ok, reference};
use crate::gate::run_gated;
use crate::session::{Operation, PrinterConnection};

use super::super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Handle POST /api/connections - connect and wait for the link.
///
/// Responds with the identity, or `null` when the link was interrupted
/// before it came up.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<Option<PrinterConnection>>> {
    let encoding = req
        .encoding
        .unwrap_or_else(|| state.default_encoding.as_str().to_string());
    let registry = state.registry.clone();

    let identity = run_gated(state.gate.as_ref(), "connect", || async move {
        registry.connect(&req.address, Some(encoding.as_str())).await
    })
    .await?;
    Ok(Json(identity))
}

/// Handle GET /api/connections - live sessions, dead links pruned.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<PrinterConnection>> {
    Json(state.registry.list_connections().await)
}

/// Handle DELETE /api/connections/:id and DELETE /api/connection
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    id: Option<Path<String>>,
) -> ApiResult<Json<Value>> {
    state.registry.disconnect(reference(id)?).await?;
    Ok(ok())
}

/// Handle GET /api/connections/:id/status and GET /api/connection/status
///
/// Unknown ids answer `false` rather than 404.
pub async fn status(
    State(state): State<Arc<AppState>>,
    id: Option<Path<String>>,
) -> Json<Value> {
    let connected = match reference(id) {
        Ok(id) => state.registry.is_connected(id).await,
        Err(_) => false,
    };
    Json(json!({ "connected": connected }))
}

/// Handle POST /api/connections/:id/ops - apply a list of operations.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    id: Option<Path<String>>,
    Json(ops): Json<Vec<Operation>>,
) -> ApiResult<Json<Value>> {
    state.registry.apply_all(reference(id)?, &ops).await?;
    Ok(ok())
}

/// Handle POST /api/connections/:id/begin - start a new job.
pub async fn begin(
    State(state): State<Arc<AppState>>,
    id: Option<Path<String>>,
) -> ApiResult<Json<Value>> {
    state.registry.begin(reference(id)?).await?;
    Ok(ok())
}

/// Handle POST /api/connections/:id/write - send the job to the printer.
pub async fn write(
    State(state): State<Arc<AppState>>,
    id: Option<Path<String>>,
) -> ApiResult<Json<Value>> {
    state.registry.write(reference(id)?).await?;
    Ok(ok())
}
