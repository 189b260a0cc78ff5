//! Application-wide error type.
//!
//! Every fallible path in this crate returns `Result<T, AppError>` (or a
//! narrower error convertible into it via `From`). `AppError` is the single
//! type that crosses the boundary into the HTTP layer, where its
//! `IntoResponse` impl renders the problem-detail body shape used by every
//! endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    Expired,

    #[error("malformed token")]
    Malformed,

    #[error("email already registered")]
    EmailTaken,

    #[error("password does not meet minimum strength requirements")]
    WeakPassword,

    #[error("daily quota exceeded")]
    QuotaExceeded,

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("no data available for {0}")]
    NoDataAvailable(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unknown paper id: {0}")]
    UnknownPaper(String),

    #[error("llm call failed: {0}")]
    LlmError(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream busy, try again")]
    Busy,

    #[error("no provider capacity available")]
    NoCapacity,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Problem-detail body shared by every error response.
///
/// Shape: `{type, title, status, detail, hint?}`, matching the external
/// contract every endpoint advertises in its error column.
#[derive(Debug, Serialize)]
struct ProblemDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Expired => "EXPIRED",
            AppError::Malformed => "MALFORMED",
            AppError::EmailTaken => "EMAIL_TAKEN",
            AppError::WeakPassword => "WEAK_PASSWORD",
            AppError::QuotaExceeded => "QUOTA_EXCEEDED",
            AppError::UnknownTicker(_) => "UNKNOWN_TICKER",
            AppError::UnknownMetric(_) => "UNKNOWN_METRIC",
            AppError::NoDataAvailable(_) => "NO_DATA_AVAILABLE",
            AppError::MalformedRequest(_) => "MALFORMED_REQUEST",
            AppError::UnknownPaper(_) => "UNKNOWN_PAPER",
            AppError::LlmError(_) => "LLM_ERROR",
            AppError::Timeout => "TIMEOUT",
            AppError::Busy => "BUSY",
            AppError::NoCapacity => "NO_CAPACITY",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Expired => StatusCode::UNAUTHORIZED,
            AppError::Malformed => StatusCode::UNAUTHORIZED,
            AppError::EmailTaken => StatusCode::BAD_REQUEST,
            AppError::WeakPassword => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::UnknownTicker(_) => StatusCode::NOT_FOUND,
            AppError::UnknownMetric(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NoDataAvailable(_) => StatusCode::NOT_FOUND,
            AppError::MalformedRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnknownPaper(_) => StatusCode::NOT_FOUND,
            AppError::LlmError(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NoCapacity => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            AppError::QuotaExceeded => Some("retry after the next UTC day rollover"),
            AppError::Busy => Some("retry shortly"),
            AppError::NoCapacity => Some("all configured LLM providers are exhausted"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        } else {
            tracing::warn!(error = %self, kind = self.kind(), "request rejected");
        }
        let body = ProblemDetail {
            kind: self.kind(),
            title: self.to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            hint: self.hint(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout
        } else {
            AppError::Internal(format!("upstream transport error: {e}"))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization error: {e}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(format!("io error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429() {
        assert_eq!(AppError::QuotaExceeded.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::QuotaExceeded.kind(), "QUOTA_EXCEEDED");
    }

    #[test]
    fn llm_error_maps_to_502() {
        assert_eq!(
            AppError::LlmError("boom".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn timeout_maps_to_504() {
        assert_eq!(AppError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn unknown_metric_maps_to_422() {
        assert_eq!(
            AppError::UnknownMetric("foo".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn hint_present_only_where_relevant() {
        assert!(AppError::QuotaExceeded.hint().is_some());
        assert!(AppError::InvalidCredentials.hint().is_none());
    }
}
