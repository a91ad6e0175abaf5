//! Application-wide error types.
//!
//! Every failure carries a stable machine-readable `kind` on the wire:
//!
//! | Variant                          | kind            | HTTP |
//! |----------------------------------|-----------------|------|
//! | `Validation`                     | `validation`    | 400  |
//! | `Authorization`                  | `authorization` | 403  |
//! | `InvalidState`, `AlreadyConfirmed` | `invalid_state` | 400  |
//! | `NotFound`                       | `not_found`     | 404  |
//! | `Ledger`                         | `ledger_call`   | 502 / 504 |
//! | everything else                  | `server_error`  | 500  |

use std::fmt::Display;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::ledger::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid state ({current}): {message}")]
    InvalidState { current: String, message: String },

    #[error("Delivery already confirmed")]
    AlreadyConfirmed,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Ledger call failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            message: message.clone(),
            fields: vec![FieldError {
                field: field.to_string(),
                message,
            }],
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn invalid_state(current: impl Display, message: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Authorization(_) => "authorization",
            Self::InvalidState { .. } | Self::AlreadyConfirmed => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Ledger(_) => "ledger_call",
            Self::Database(_) | Self::Migrate(_) | Self::Json(_) | Self::Config(_) => {
                "server_error"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidState { .. } | Self::AlreadyConfirmed => {
                StatusCode::BAD_REQUEST
            }
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Ledger(LedgerError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Ledger(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Migrate(_) | Self::Json(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Collects field-level validation failures and reports them together.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.0.push(FieldError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
    }

    pub fn finish(self) -> Result<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        let message = self
            .0
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::Validation {
            message,
            fields: self.0,
        })
    }
}

/// `true` when the error is a violated UNIQUE constraint or index.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────
// HTTP mapping
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {self}");
        }

        let body = match self {
            Self::Validation { message, fields } => ErrorResponse {
                kind,
                message,
                reason: None,
                current_status: None,
                fields,
            },
            Self::InvalidState { current, message } => ErrorResponse {
                kind,
                message,
                reason: None,
                current_status: Some(current),
                fields: Vec::new(),
            },
            Self::AlreadyConfirmed => ErrorResponse {
                kind,
                message: "Delivery already confirmed".to_string(),
                reason: Some("already_confirmed"),
                current_status: Some("Delivered".to_string()),
                fields: Vec::new(),
            },
            Self::Database(_) | Self::Migrate(_) | Self::Json(_) | Self::Config(_) => {
                ErrorResponse {
                    kind,
                    message: "Internal server error".to_string(),
                    reason: None,
                    current_status: None,
                    fields: Vec::new(),
                }
            }
            other => ErrorResponse {
                kind,
                message: other.to_string(),
                reason: None,
                current_status: None,
                fields: Vec::new(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation {
            message: rejection.body_text(),
            fields: Vec::new(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation {
            message: rejection.body_text(),
            fields: Vec::new(),
        }
    }
}
