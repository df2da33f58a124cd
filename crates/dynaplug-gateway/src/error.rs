// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping from runtime errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dynaplug_core::{DynaplugError, ErrorKind};
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Raw toolchain output, on build failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            output: None,
        }
    }
}

/// HTTP status for an error class.
pub fn status_for(err: &DynaplugError) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Security => StatusCode::FORBIDDEN,
        ErrorKind::Build => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Io | ErrorKind::Runtime | ErrorKind::Config => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// A [`DynaplugError`] returned from a handler.
#[derive(Debug)]
pub struct ApiError(pub DynaplugError);

impl From<DynaplugError> for ApiError {
    fn from(err: DynaplugError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            output: self.0.build_output().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}
