//! Dispatch-level errors and their HTTP representation.
//!
//! Every failure that escapes the dispatcher is reported to the caller the
//! same way: HTTP 500 with `{"success": false, "error": "<message>"}`.
//! Provider failures never reach this type; the dispatcher absorbs them
//! into the fallback path.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Configuration,
    Unexpected,
}

/// Errors that fail a dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No caller identity could be resolved from the request credential.
    #[error("Unauthorized")]
    Unauthorized,

    /// A setting required for the chosen path is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Unauthorized => ErrorKind::Unauthorized,
            DispatchError::Configuration(_) => ErrorKind::Configuration,
            DispatchError::InvalidRequest(_) | DispatchError::Store(_) => ErrorKind::Unexpected,
        }
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Body returned for every failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

impl From<&DispatchError> for FailureResponse {
    fn from(err: &DispatchError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = Json(FailureResponse::from(&self));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
