//! Error taxonomy for the report endpoints.
//!
//! Every per-request failure is an [`AnalyticsError`]. Each variant maps to an
//! [`ErrorCode`], which carries the HTTP status, a metrics category and a
//! retryability hint. Configuration errors are only ever produced at startup.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Stable machine-readable error codes returned in error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A query parameter could not be interpreted
    InvalidFilter,
    /// A partition table was missing or the database was unreachable
    PartitionUnavailable,
    /// A fetched row carried a value that is not numeric where a number is required
    MalformedRow,
    /// A partition fetch or the whole request ran past its time budget
    Timeout,
    /// Required settings were missing or invalid at startup
    Configuration,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidFilter => "invalid_filter",
            ErrorCode::PartitionUnavailable => "partition_unavailable",
            ErrorCode::MalformedRow => "malformed_row",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Configuration => "configuration",
        }
    }

    /// HTTP status surfaced to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidFilter => StatusCode::BAD_REQUEST,
            ErrorCode::PartitionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::MalformedRow | ErrorCode::Configuration => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Error category for metrics and error bodies
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidFilter => "client_error",
            ErrorCode::PartitionUnavailable => "upstream_error",
            ErrorCode::MalformedRow => "data_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Configuration => "server_error",
        }
    }

    /// Whether a client may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::PartitionUnavailable | ErrorCode::Timeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid {parameter} filter '{value}': {reason}")]
    InvalidFilter {
        parameter: &'static str,
        value: String,
        reason: String,
    },

    #[error("partition table '{table}' is unavailable: {reason}")]
    PartitionUnavailable { table: String, reason: String },

    #[error("malformed row in '{table}': column '{column}' holds invalid value '{value}'")]
    MalformedRow {
        table: String,
        column: String,
        value: String,
    },

    #[error("fetch from '{table}' timed out after {}ms", .elapsed.as_millis())]
    FetchTimeout { table: String, elapsed: Duration },

    #[error("report deadline of {}ms exceeded before '{table}' could be fetched", .budget.as_millis())]
    DeadlineExceeded { table: String, budget: Duration },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

impl AnalyticsError {
    pub fn invalid_year(value: impl Into<String>) -> Self {
        AnalyticsError::InvalidFilter {
            parameter: "year",
            value: value.into(),
            reason: "expected 'all' or an integer year".to_string(),
        }
    }

    pub fn partition_unavailable(table: impl Into<String>, reason: impl fmt::Display) -> Self {
        AnalyticsError::PartitionUnavailable {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AnalyticsError::InvalidFilter { .. } => ErrorCode::InvalidFilter,
            AnalyticsError::PartitionUnavailable { .. } => ErrorCode::PartitionUnavailable,
            AnalyticsError::MalformedRow { .. } => ErrorCode::MalformedRow,
            AnalyticsError::FetchTimeout { .. } | AnalyticsError::DeadlineExceeded { .. } => {
                ErrorCode::Timeout
            }
            AnalyticsError::Configuration(_) => ErrorCode::Configuration,
        }
    }
}

/// Error body returned to HTTP callers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub category: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl From<&AnalyticsError> for ErrorResponse {
    fn from(error: &AnalyticsError) -> Self {
        let code = error.code();
        Self {
            error: ErrorBody {
                code,
                category: code.category(),
                message: error.to_string(),
                retryable: code.is_retryable(),
            },
        }
    }
}

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        let status = self.code().status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = %self.code(), "report request failed");
        } else {
            tracing::warn!(error = %self, code = %self.code(), "report request rejected");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}
