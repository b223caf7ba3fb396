use thiserror::Error;

use crate::auth::{StoreError, TerminationReason};

#[derive(Error, Debug)]
pub enum ApiError {
    /// The session was ended and the login entry point was notified.
    #[error("Session ended: {0}")]
    SessionEnded(TerminationReason),

    #[error("Server error {status_code}: {message}")]
    Backend { status_code: u16, message: String },

    #[error("Token refresh unavailable: {0}")]
    RefreshUnavailable(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn backend(status_code: u16, message: &str) -> Self {
        ApiError::Backend {
            status_code,
            message: Self::truncate_body(message),
        }
    }

    /// True when the session is gone and the caller should stop.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::SessionEnded(_))
    }

    /// The application-level status code, when the backend supplied one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Backend { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(ApiError::truncate_body("oops"), "oops");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = format!("{}é{}", "a".repeat(499), "b".repeat(100));
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"a".repeat(499)));
    }

    #[test]
    fn test_session_ended_helpers() {
        let err = ApiError::SessionEnded(TerminationReason::RefreshRejected);
        assert!(err.is_session_ended());
        assert_eq!(err.status_code(), None);
        assert_eq!(err.to_string(), "Session ended: token refresh rejected");

        let err = ApiError::backend(500, "boom");
        assert!(!err.is_session_ended());
        assert_eq!(err.status_code(), Some(500));
    }
}
