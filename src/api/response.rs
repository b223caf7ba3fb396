//! Backend response envelope and the response classifier.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::ApiRequest;

/// Application status for access-token expiry
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Application status for an unknown or expired session
pub const STATUS_SESSION_NOT_FOUND: u16 = 404;

/// Application-level envelope carried by every backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl Envelope {
    /// Parse a response body. Bodies that aren't an envelope (proxy error
    /// pages, bare JSON) are wrapped using the HTTP status instead.
    pub fn parse(http_status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) if value.get("status").is_some_and(Value::is_string) => {
                serde_json::from_value(value.clone())
                    .unwrap_or_else(|_| Self::from_http(http_status, Some(value)))
            }
            Ok(value) => Self::from_http(http_status, Some(value)),
            Err(_) if body.is_empty() => Self::from_http(http_status, None),
            Err(_) => Self::from_http(http_status, Some(Value::String(body.to_string()))),
        }
    }

    fn from_http(http_status: StatusCode, payload: Option<Value>) -> Self {
        if http_status.is_success() {
            Self {
                status: "ok".to_string(),
                result: payload,
                error: None,
                status_code: Some(http_status.as_u16()),
            }
        } else {
            Self {
                status: "error".to_string(),
                result: None,
                error: payload,
                status_code: Some(http_status.as_u16()),
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn into_result(self) -> Value {
        self.result.unwrap_or(Value::Null)
    }

    /// Human-readable error text.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("request failed with status {}", self.status),
        }
    }
}

/// Outcome of inspecting a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// The session behind the refresh credential is gone; nothing to retry.
    SessionNotFound,
    /// The access token expired; a refresh may fix it.
    RecoverableAuthFailure,
    /// The refresh endpoint itself was rejected.
    TerminalAuthFailure,
    OtherError,
}

/// True when `request` targets the refresh endpoint at `refresh_path`.
pub fn is_refresh_endpoint(request: &ApiRequest, refresh_path: &str) -> bool {
    request.is_refresh() || request.endpoint_path() == refresh_path.trim_start_matches('/')
}

/// Classify a response. A 401 from the refresh endpoint is always terminal,
/// which is what keeps a failing refresh from triggering another refresh.
pub fn classify(
    envelope: &Envelope,
    http_status: StatusCode,
    request: &ApiRequest,
    refresh_path: &str,
) -> Classification {
    if envelope.is_ok() {
        return Classification::Success;
    }

    match envelope.status_code.unwrap_or(http_status.as_u16()) {
        STATUS_SESSION_NOT_FOUND => Classification::SessionNotFound,
        STATUS_UNAUTHORIZED if is_refresh_endpoint(request, refresh_path) => {
            Classification::TerminalAuthFailure
        }
        STATUS_UNAUTHORIZED => Classification::RecoverableAuthFailure,
        _ => Classification::OtherError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REFRESH: &str = "/auth/refresh";

    fn error_envelope(code: u16) -> Envelope {
        Envelope {
            status: "error".to_string(),
            result: None,
            error: Some(json!("nope")),
            status_code: Some(code),
        }
    }

    #[test]
    fn test_parse_envelope() {
        let body = r#"{"status":"ok","statusCode":200,"result":{"accesstoken":"T2"}}"#;
        let envelope = Envelope::parse(StatusCode::OK, body);
        assert!(envelope.is_ok());
        assert_eq!(envelope.into_result()["accesstoken"], "T2");
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"status":"error","statusCode":401,"error":"Invalid access key"}"#;
        let envelope = Envelope::parse(StatusCode::OK, body);
        assert!(!envelope.is_ok());
        assert_eq!(envelope.status_code, Some(401));
        assert_eq!(envelope.error_message(), "Invalid access key");
    }

    #[test]
    fn test_parse_non_envelope_bodies() {
        let envelope = Envelope::parse(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(!envelope.is_ok());
        assert_eq!(envelope.status_code, Some(502));
        assert_eq!(envelope.error_message(), "<html>bad gateway</html>");

        let envelope = Envelope::parse(StatusCode::OK, r#"[1,2,3]"#);
        assert!(envelope.is_ok());
        assert_eq!(envelope.into_result(), json!([1, 2, 3]));

        let envelope = Envelope::parse(StatusCode::UNAUTHORIZED, "");
        assert_eq!(envelope.status_code, Some(401));
    }

    #[test]
    fn test_classify_success_ignores_status_code() {
        let envelope = Envelope::parse(StatusCode::OK, r#"{"status":"ok","statusCode":201}"#);
        let request = ApiRequest::get("/obstacles/all");
        assert_eq!(
            classify(&envelope, StatusCode::OK, &request, REFRESH),
            Classification::Success
        );
    }

    #[test]
    fn test_classify_auth_failures() {
        let request = ApiRequest::get("/profiledetails");
        assert_eq!(
            classify(&error_envelope(401), StatusCode::OK, &request, REFRESH),
            Classification::RecoverableAuthFailure
        );
        assert_eq!(
            classify(&error_envelope(404), StatusCode::OK, &request, REFRESH),
            Classification::SessionNotFound
        );
    }

    #[test]
    fn test_classify_refresh_endpoint_401_is_terminal() {
        let by_path = ApiRequest::get("auth/refresh");
        assert_eq!(
            classify(&error_envelope(401), StatusCode::OK, &by_path, REFRESH),
            Classification::TerminalAuthFailure
        );

        let by_marker = ApiRequest::get("/custom/renew").refresh();
        assert_eq!(
            classify(&error_envelope(401), StatusCode::OK, &by_marker, REFRESH),
            Classification::TerminalAuthFailure
        );

        let absolute = ApiRequest::get("http://localhost:4000/auth/refresh");
        assert_eq!(
            classify(&error_envelope(401), StatusCode::OK, &absolute, REFRESH),
            Classification::TerminalAuthFailure
        );
    }

    #[test]
    fn test_classify_refresh_endpoint_404_is_session_not_found() {
        let request = ApiRequest::get(REFRESH).refresh();
        assert_eq!(
            classify(&error_envelope(404), StatusCode::OK, &request, REFRESH),
            Classification::SessionNotFound
        );
    }

    #[test]
    fn test_classify_other_errors() {
        let request = ApiRequest::post("/obstacles/report");
        for code in [400, 403, 409, 500, 503] {
            assert_eq!(
                classify(&error_envelope(code), StatusCode::OK, &request, REFRESH),
                Classification::OtherError,
                "status {}",
                code
            );
        }
    }

    #[test]
    fn test_classify_falls_back_to_http_status() {
        let envelope = Envelope {
            status: "error".to_string(),
            result: None,
            error: None,
            status_code: None,
        };
        let request = ApiRequest::get("/crowd/all");
        assert_eq!(
            classify(&envelope, StatusCode::UNAUTHORIZED, &request, REFRESH),
            Classification::RecoverableAuthFailure
        );
    }
}
