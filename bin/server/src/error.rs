//! Domain error types for the server.
//!
//! - `ApiError`: request failures, rendered as `{"error": "..."}` bodies
//! - `StartupError`: failures while wiring the server (wrapped in a `Report`)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request body or a path parameter was invalid.
    BadRequest { message: String },
    /// The addressed resource does not exist.
    NotFound { resource: &'static str, id: String },
    /// The feature needs a backend that is not configured.
    Unavailable { feature: &'static str, requires: &'static str },
    /// A backend failed while serving the request.
    Internal { details: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn internal(details: impl fmt::Display) -> Self {
        Self::Internal {
            details: details.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest { message } => write!(f, "{message}"),
            Self::NotFound { resource, id } => write!(f, "{resource} '{id}' not found"),
            Self::Unavailable { feature, requires } => {
                write!(f, "{feature} requires {requires} to be configured")
            }
            Self::Internal { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { details } => {
                tracing::error!(error = %details, "request failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response();
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    Config { details: String },
    Database { details: String },
    Migration { details: String },
    Queue { details: String },
    Bind { addr: String, details: String },
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "database migration failed: {details}"),
            Self::Queue { details } => write!(f, "job queue unavailable: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind '{addr}': {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}
