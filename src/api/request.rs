//! Outgoing request descriptors and the bearer-token interceptor.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

use crate::auth::TokenStore;

use super::ApiError;

const BEARER_PREFIX: &str = "Bearer ";

/// Request body. Kept in memory so the request can be re-sent after a refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
}

/// Description of a request to the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Body,
    refresh: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            refresh: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = Body::Bytes {
            content_type: content_type.into(),
            data,
        };
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from strings, e.g. `("email", "rider@example.com")`.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("header {}: {}", name, e)))?;
        Ok(self.header(name, value))
    }

    /// Mark this request as a call to the refresh endpoint.
    pub(crate) fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn is_refresh(&self) -> bool {
        self.refresh
    }

    /// The bearer token this request currently carries.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
    }

    /// Path component used to recognize endpoints, without leading slash.
    pub fn endpoint_path(&self) -> &str {
        let path = match self.path.find("://") {
            Some(scheme_end) => {
                let rest = &self.path[scheme_end + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("")
            }
            None => self.path.as_str(),
        };
        let path = path.split(['?', '#']).next().unwrap_or("");
        path.trim_start_matches('/')
    }

    /// Full URL for this request against `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path.clone()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            )
        }
    }
}

/// Set `Authorization: Bearer <token>`, replacing any existing value.
/// With no token the request is left untouched.
pub fn attach_bearer(request: &mut ApiRequest, token: Option<&str>) {
    let Some(token) = token else {
        return;
    };
    match HeaderValue::from_str(&format!("{}{}", BEARER_PREFIX, token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(_) => tracing::warn!("Stored access token is not a valid header value"),
    }
}

/// Attach the store's current token to an outgoing request.
pub fn intercept(request: &mut ApiRequest, store: &TokenStore) {
    attach_bearer(request, store.access_token().as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_url_joins_relative_paths() {
        let base = "http://localhost:4000/";
        assert_eq!(ApiRequest::get("/obstacles/all").url(base), "http://localhost:4000/obstacles/all");
        assert_eq!(ApiRequest::get("obstacles/all").url(base), "http://localhost:4000/obstacles/all");
        assert_eq!(
            ApiRequest::get("https://other.example.com/x").url(base),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_endpoint_path() {
        assert_eq!(ApiRequest::get("/auth/refresh").endpoint_path(), "auth/refresh");
        assert_eq!(ApiRequest::get("auth/refresh?x=1").endpoint_path(), "auth/refresh");
        assert_eq!(
            ApiRequest::get("http://localhost:4000/auth/refresh").endpoint_path(),
            "auth/refresh"
        );
        assert_eq!(ApiRequest::get("http://localhost:4000").endpoint_path(), "");
    }

    #[test]
    fn test_attach_bearer_sets_and_replaces() {
        let mut request = ApiRequest::get("/profiledetails");
        attach_bearer(&mut request, Some("T1"));
        assert_eq!(request.bearer_token(), Some("T1"));

        attach_bearer(&mut request, Some("T2"));
        assert_eq!(request.bearer_token(), Some("T2"));
        assert_eq!(request.headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_attach_bearer_without_token_leaves_request() {
        let mut request = ApiRequest::get("/obstacles/public");
        attach_bearer(&mut request, None);
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_intercept_uses_store() {
        let store = TokenStore::load(Arc::new(MemoryStore::new())).unwrap();
        let mut request = ApiRequest::get("/obstacles/all");
        intercept(&mut request, &store);
        assert_eq!(request.bearer_token(), None);

        store.set_access_token("T9").unwrap();
        intercept(&mut request, &store);
        assert_eq!(request.bearer_token(), Some("T9"));
    }

    #[test]
    fn test_try_header() {
        let request = ApiRequest::get("/obstacles/user")
            .try_header("email", "rider@example.com")
            .unwrap();
        assert_eq!(request.headers.get("email").unwrap(), "rider@example.com");

        assert!(ApiRequest::get("/x").try_header("bad header", "v").is_err());
    }

    #[test]
    fn test_refresh_marker() {
        assert!(!ApiRequest::get("/auth/refresh").is_refresh());
        assert!(ApiRequest::get("/auth/refresh").refresh().is_refresh());
    }
}
