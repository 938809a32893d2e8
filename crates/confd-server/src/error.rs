// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use confd_core::ConfdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the confd HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 403,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Maps store/coordinator failures onto the HTTP-facing error kind. The
/// release CAS conflict becomes a `409`, distinct from a generic `500`, so
/// a management caller can tell a transient race from a real failure.
impl From<&ConfdError> for ApiError {
    fn from(err: &ConfdError) -> Self {
        match err {
            ConfdError::AppNotFound(_) | ConfdError::EntryNotFound(_) => ApiError::NotFound,
            ConfdError::NothingStaged(_) => ApiError::BadRequest,
            ConfdError::ReleaseConflict(_) | ConfdError::DuplicateKey(_) => ApiError::Conflict,
            ConfdError::UnexpectedRowCount(_) | ConfdError::Storage(_) | ConfdError::Serialization(_) => {
                ApiError::Internal
            }
        }
    }
}

pub fn confd_error_response(err: &ConfdError) -> (StatusCode, Json<ErrorResponse>) {
    let api_err = ApiError::from(err);
    api_err.to_http_response(err.to_string())
}
