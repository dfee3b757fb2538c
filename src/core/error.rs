//! # Error Handling Module
//!
//! Error types for the resilience layer and the catalog surface it protects,
//! built on `thiserror`. Every variant maps to an HTTP status code so handlers
//! can return `ShieldResult<T>` and let axum render the failure.
//!
//! Note that most of the layer never produces errors at all: a rate-limit
//! denial, a cache miss or a missing idempotency record are ordinary outcomes.
//! `ShieldError` covers configuration problems, request validation and
//! failures reported by the business backends.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the crate
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Error types for the resilience layer
#[derive(Debug, Error, Clone)]
pub enum ShieldError {
    /// Configuration-related errors (invalid config, unreadable file, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Admission was denied by a token bucket
    #[error("Rate limit exceeded for policy {policy}, retry after {retry_after_secs}s")]
    RateLimitExceeded { policy: String, retry_after_secs: u64 },

    /// Request validation errors (missing fields, malformed values, etc.)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// A resource referenced by the request does not exist
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// A business backend failed while serving the request
    #[error("Upstream failure in {backend}: {message}")]
    Upstream { backend: String, message: String },

    /// Internal errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (config files, listeners)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl ShieldError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error for a specific field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an upstream failure attributed to a backend
    pub fn upstream<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        Self::Upstream {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if a client may retry the request and expect a different outcome
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::Upstream { .. } | Self::Io { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    /// Structured JSON body used for error responses
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "code": self.status_code().as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        })
    }
}

impl From<Infallible> for ShieldError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for ShieldError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ShieldError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ShieldError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Render errors as JSON responses. A rate-limit denial also carries
/// `Retry-After` so clients can back off without parsing the body.
impl IntoResponse for ShieldError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.to_json())).into_response();

        if let Self::RateLimitExceeded { retry_after_secs, .. } = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ShieldError::validation("score", "must be between 1 and 5").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShieldError::not_found("product RNG-001").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ShieldError::RateLimitExceeded {
                policy: "catalog".to_string(),
                retry_after_secs: 2,
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ShieldError::upstream("orders", "connection reset").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ShieldError::upstream("orders", "timeout").is_retryable());
        assert!(!ShieldError::validation("email", "missing").is_retryable());
        assert!(!ShieldError::config("bad port").is_retryable());
    }

    #[test]
    fn test_rate_limit_response_has_retry_after() {
        let response = ShieldError::RateLimitExceeded {
            policy: "mutation".to_string(),
            retry_after_secs: 7,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn test_error_json_shape() {
        let body = ShieldError::not_found("order 1001").to_json();
        assert_eq!(body["error"]["code"], 404);
        assert_eq!(body["error"]["type"], "not_found");
        assert_eq!(body["error"]["retryable"], false);
    }
}
