use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conduit_core::TranscriptError;
use conduit_engine::McpTableError;
use conduit_store::StoreError;

/// Error body of every JSON endpoint: `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Store(_) | Self::Transcript(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<McpTableError> for ApiError {
    fn from(e: McpTableError) -> Self {
        let msg = e.to_string();
        match e {
            McpTableError::NotFound(_) => Self::NotFound(msg),
            McpTableError::Store(inner) => Self::Store(inner),
            _ => Self::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
