//! Structured error handling for the wallet synchronization core
//!
//! Every failure is classified up front as transient (worth retrying) or
//! permanent (surfaced immediately). Errors are `Clone` because a single
//! in-flight fetch hands the same outcome to every consumer attached to it.

use thiserror::Error;

pub mod http;

pub use http::classify_status;

pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// MAIN ERROR TYPE
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Transient error: {0}")]
    Transient(TransientError),

    #[error("Permanent error: {0}")]
    Permanent(PermanentError),

    #[error(
        "Partial batch failure after {completed_batches} completed batches \
         (indices {}..={}): {cause}",
        failed_range.0,
        failed_range.1
    )]
    PartialBatchFailure {
        completed_batches: usize,
        failed_range: (u32, u32),
        cause: Box<SyncError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// TRANSIENT ERROR TYPES
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransientError {
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("timeout to {endpoint} after {timeout_ms}ms")]
    NetworkTimeout { endpoint: String, timeout_ms: u64 },

    #[error("service unavailable at {endpoint} (HTTP {status})")]
    ServiceUnavailable { endpoint: String, status: u16 },
}

// =============================================================================
// PERMANENT ERROR TYPES
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PermanentError {
    #[error("invalid address '{address}'")]
    InvalidAddress { address: String },

    #[error("unauthorized at {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("{what} not found")]
    NotFound { what: String },
}

impl SyncError {
    /// Only transient failures are retried; everything else surfaces at once
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Suggested minimum wait before the next attempt, if the server sent one
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            SyncError::Transient(TransientError::RateLimited { retry_after_ms }) => *retry_after_ms,
            _ => None,
        }
    }

    pub fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        SyncError::Transient(TransientError::RateLimited { retry_after_ms })
    }

    pub fn timeout(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
        SyncError::Transient(TransientError::NetworkTimeout {
            endpoint: endpoint.into(),
            timeout_ms,
        })
    }

    pub fn invalid_address(address: impl Into<String>) -> Self {
        SyncError::Permanent(PermanentError::InvalidAddress {
            address: address.into(),
        })
    }

    pub fn malformed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Permanent(PermanentError::MalformedResponse {
            endpoint: endpoint.into(),
            reason: reason.into(),
        })
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::Permanent(PermanentError::NotFound { what: what.into() })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        SyncError::Persistence(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SyncError::Internal(message.into())
    }
}

// =============================================================================
// CONVERSIONS FROM LIBRARY ERRORS
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_timeout() {
            return SyncError::timeout(endpoint, 0);
        }
        if err.is_decode() {
            return SyncError::malformed(endpoint, err.to_string());
        }
        if let Some(status) = err.status() {
            return classify_status(&endpoint, status.as_u16(), None, None);
        }
        if err.is_connect() || err.is_request() {
            return SyncError::Transient(TransientError::ServiceUnavailable { endpoint, status: 0 });
        }
        SyncError::internal(format!("HTTP request failed: {}", err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::malformed("json", err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(format!("IO error: {}", err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Configuration(err.to_string())
    }
}
