use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::auth::TokenStore;

use super::cookies::SessionCookies;
use super::request::{intercept, ApiRequest, Body};
use super::response::{classify, Classification, Envelope};
use super::ApiError;

/// A response that made it back from the backend.
#[derive(Debug, Clone)]
pub struct Completed {
    pub http_status: StatusCode,
    pub envelope: Envelope,
}

impl Completed {
    /// Application status code, falling back to the HTTP status.
    pub fn status_code(&self) -> u16 {
        self.envelope
            .status_code
            .unwrap_or(self.http_status.as_u16())
    }

    pub fn to_error(&self) -> ApiError {
        ApiError::backend(self.status_code(), &self.envelope.error_message())
    }
}

/// HTTP plumbing shared by the pipeline and the refresh call.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    refresh_path: String,
    store: Arc<TokenStore>,
}

impl Transport {
    pub fn new(
        base_url: impl Into<String>,
        refresh_path: impl Into<String>,
        timeout: Duration,
        store: Arc<TokenStore>,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        let refresh_path = refresh_path.into();

        // The refresh credential travels as an HTTP-only cookie.
        let refresh_url = ApiRequest::get(refresh_path.as_str()).url(&base_url);
        let scope = Url::parse(&refresh_url)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", refresh_url, e)))?;
        let cookies = Arc::new(SessionCookies::restore(store.clone(), scope));

        let client = Client::builder()
            .timeout(timeout)
            .cookie_provider(cookies)
            .build()?;

        Ok(Self {
            client,
            base_url,
            refresh_path,
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Attach the current token, then send.
    pub async fn execute(&self, request: &mut ApiRequest) -> Result<Completed, ApiError> {
        intercept(request, &self.store);
        self.send(request).await
    }

    /// Send exactly as described, without touching the auth header.
    pub async fn send(&self, request: &ApiRequest) -> Result<Completed, ApiError> {
        let url = request.url(&self.base_url);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());

        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Bytes { content_type, data } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
        };

        debug!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await?;
        let http_status = response.status();
        let text = response.text().await?;
        let envelope = Envelope::parse(http_status, &text);
        debug!(
            url = %url,
            http_status = http_status.as_u16(),
            status = %envelope.status,
            status_code = ?envelope.status_code,
            "Response received"
        );

        Ok(Completed {
            http_status,
            envelope,
        })
    }

    pub fn classify(&self, request: &ApiRequest, completed: &Completed) -> Classification {
        classify(
            &completed.envelope,
            completed.http_status,
            request,
            &self.refresh_path,
        )
    }
}
