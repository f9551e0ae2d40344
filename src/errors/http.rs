//! HTTP status classification for explorer and node responses

use super::{PermanentError, SyncError, TransientError};

/// Map a non-success HTTP status onto the error taxonomy
///
/// `address` is set when the request targeted an address route, so that
/// 400/404 can be reported as an invalid address rather than a missing resource.
pub fn classify_status(
    endpoint: &str,
    status: u16,
    retry_after_ms: Option<u64>,
    address: Option<&str>,
) -> SyncError {
    match status {
        429 => SyncError::Transient(TransientError::RateLimited { retry_after_ms }),
        408 | 504 => SyncError::Transient(TransientError::NetworkTimeout {
            endpoint: endpoint.to_string(),
            timeout_ms: 0,
        }),
        401 | 403 => SyncError::Permanent(PermanentError::Unauthorized {
            endpoint: endpoint.to_string(),
        }),
        400 | 404 if address.is_some() => SyncError::Permanent(PermanentError::InvalidAddress {
            address: address.unwrap_or_default().to_string(),
        }),
        404 => SyncError::Permanent(PermanentError::NotFound {
            what: endpoint.to_string(),
        }),
        500..=599 => SyncError::Transient(TransientError::ServiceUnavailable {
            endpoint: endpoint.to_string(),
            status,
        }),
        _ => SyncError::Permanent(PermanentError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: format!("unexpected HTTP status {}", status),
        }),
    }
}
