use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{SessionTerminator, TerminationReason};

use super::request::{attach_bearer, ApiRequest};
use super::response::Classification;
use super::transport::Transport;
use super::ApiError;

/// A request rejected for an expired token, waiting for a fresh one.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: ApiRequest,
    original_auth_header: Option<String>,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        let original_auth_header = request.bearer_token().map(str::to_string);
        Self {
            request,
            original_auth_header,
        }
    }

    /// The token the request was originally sent with.
    pub fn original_token(&self) -> Option<&str> {
        self.original_auth_header.as_deref()
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }
}

/// Re-send `pending` once with `token`.
///
/// Whatever comes back is final: an auth failure here ends the session
/// instead of starting another refresh.
pub async fn retry_once(
    transport: &Transport,
    terminator: &SessionTerminator,
    pending: PendingRequest,
    token: &str,
) -> Result<Value, ApiError> {
    let mut request = pending.request;
    attach_bearer(&mut request, Some(token));
    debug!(method = %request.method, path = %request.path, "Retrying with refreshed token");

    let completed = transport.send(&request).await?;

    match transport.classify(&request, &completed) {
        Classification::Success => Ok(completed.envelope.into_result()),
        Classification::SessionNotFound => {
            terminator.terminate(TerminationReason::SessionNotFound);
            Err(ApiError::SessionEnded(TerminationReason::SessionNotFound))
        }
        Classification::RecoverableAuthFailure | Classification::TerminalAuthFailure => {
            warn!(path = %request.path, "Request rejected again after refresh");
            terminator.terminate(TerminationReason::RetryRejected);
            Err(ApiError::SessionEnded(TerminationReason::RetryRejected))
        }
        Classification::OtherError => Err(completed.to_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_request_remembers_original_token() {
        let mut request = ApiRequest::get("/profiledetails");
        attach_bearer(&mut request, Some("T1"));

        let pending = PendingRequest::new(request);
        assert_eq!(pending.original_token(), Some("T1"));
        assert_eq!(pending.request().path, "/profiledetails");
    }

    #[test]
    fn test_pending_request_without_token() {
        let pending = PendingRequest::new(ApiRequest::get("/obstacles/public"));
        assert_eq!(pending.original_token(), None);
    }
}
