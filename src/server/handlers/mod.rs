//! HTTP handlers for the server.

pub mod connections;
pub mod events;
pub mod scan;

use axum::{
    Json,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use crate::error::ThermolinkError;
use crate::session::SessionId;

/// Error half of every handler result.
pub struct ApiError(ThermolinkError);

impl From<ThermolinkError> for ApiError {
    fn from(err: ThermolinkError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &ThermolinkError) -> StatusCode {
    match err {
        ThermolinkError::UnknownSession => StatusCode::NOT_FOUND,
        ThermolinkError::AmbiguousSession
        | ThermolinkError::InvalidArgument(_)
        | ThermolinkError::Encoding(_)
        | ThermolinkError::Config(_) => StatusCode::BAD_REQUEST,
        ThermolinkError::NotConnected
        | ThermolinkError::AlreadyConnecting
        | ThermolinkError::Discovery(_) => StatusCode::CONFLICT,
        ThermolinkError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ThermolinkError::InterfaceCreationFailed(_) | ThermolinkError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
        ThermolinkError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        debug!(%status, error = %self.0, "request failed");
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// `{"success": true}`
pub fn ok() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

/// Parse a `:id` path segment. Anything unparseable is an unknown session.
pub fn session_id(raw: &str) -> ApiResult<SessionId> {
    Ok(raw.parse::<SessionId>()?)
}

/// Session reference from an optional `:id` segment. Routes without one
/// address the sole session.
pub fn reference(path: Option<Path<String>>) -> ApiResult<Option<SessionId>> {
    path.map(|Path(id)| session_id(&id)).transpose()
}
