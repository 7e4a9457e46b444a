//! Error taxonomy for calls against the WSN backend.
//!
//! Every Data Service failure is classified into one [`ApiError`] variant.
//! The enum is `Clone` so a page slot can keep the last failure next to its
//! cached page and hand it to every view that asks.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

// ---

/// Errors returned by the Data Service and surfaced by the reconciler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    // ---
    /// No connection could be established, or it dropped mid-request.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// 401/403 from the backend.
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    /// 4xx with an optional set of per-field messages.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, String>,
    },

    /// 5xx from the backend.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("resource not found")]
    NotFound,

    /// Token refresh failed; the session has been terminated.
    #[error("session expired")]
    SessionExpired,

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The request URL could not be built from the configured base.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Shape of the backend's error body. Both `errors` and `fieldErrors` are
/// seen in the wild.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "fieldErrors")]
    errors: BTreeMap<String, String>,
}

impl ApiError {
    // ---
    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        // ---
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());

        match status.as_u16() {
            401 | 403 => ApiError::Auth {
                status: status.as_u16(),
            },
            404 => ApiError::NotFound,
            400..=499 => ApiError::Validation {
                message,
                fields: parsed.errors,
            },
            code => ApiError::Server {
                status: code,
                message,
            },
        }
    }

    /// Build a validation error from local form checks.
    pub fn validation<I>(message: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        ApiError::Validation {
            message: message.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Only a 401 is worth a token refresh; 403 means the token is valid
    /// but lacks permission.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Auth { status: 401 })
    }

    /// Connectivity-class failures that a view renders as "offline".
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        // ---
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::from_status(status, "")
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
