//! Upstream failure taxonomy.
//!
//! Only two shapes are real errors: `Unavailable` (worth retrying, then
//! surfaced as recoverable) and `Rejected` (caller/credential problem, never
//! retried). A clean not-found is `Ok(None)` at the call site and a malformed
//! response body degrades to an empty result, so neither appears here.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Timeout, connection failure or 5xx. Retried with linear backoff up to
    /// the attempt budget, then surfaced so the caller can fall back to cache
    /// or another provider.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// 4xx response (bad credentials, bad request). Surfaced immediately.
    #[error("upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Unavailable(_))
    }

    pub fn from_status(status: reqwest::StatusCode, body_snippet: String) -> Self {
        if status.is_server_error() {
            UpstreamError::Unavailable(format!("status {status}: {body_snippet}"))
        } else {
            UpstreamError::Rejected {
                status: status.as_u16(),
                message: body_snippet,
            }
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures (timeout, connect, body read) are all
        // retryable; a status error should have been classified before this.
        if let Some(status) = err.status() {
            UpstreamError::from_status(status, err.to_string())
        } else {
            UpstreamError::Unavailable(err.to_string())
        }
    }
}

/// Linear backoff delay for the given 1-based attempt number.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let e5 = UpstreamError::from_status(reqwest::StatusCode::BAD_GATEWAY, "".into());
        assert!(e5.is_retryable());
        let e4 = UpstreamError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(!e4.is_retryable());
    }

    #[test]
    fn backoff_is_linear() {
        let base = Duration::from_millis(300);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(300));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(900));
    }
}
