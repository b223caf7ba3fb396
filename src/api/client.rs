//! API client for the Routewise backend.
//!
//! `ApiClient` runs every request through the authenticated pipeline:
//! attach the bearer token, classify the response, refresh and retry once on
//! an expired token, and end the session when recovery is impossible.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::{Session, SessionHandler, SessionTerminator, TerminationReason, TokenStore};
use crate::config::Config;

use super::refresh::{RefreshCoordinator, RefreshEndpoint, RefreshFailure};
use super::request::ApiRequest;
use super::response::Classification;
use super::retry::{retry_once, PendingRequest};
use super::transport::Transport;
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";

const SIGNUP_PATH: &str = "/auth/signup";

/// Route shown to signed-in users
const HOME_ROUTE: &str = "/";

#[derive(Debug, Deserialize)]
struct LoginResult {
    accesstoken: String,
}

/// Authenticated client for the backend.
/// Clone is cheap and clones share the token, refresh state and session.
#[derive(Clone)]
pub struct ApiClient {
    transport: Transport,
    refresh: Arc<RefreshCoordinator>,
    terminator: Arc<SessionTerminator>,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        store: Arc<TokenStore>,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self, ApiError> {
        let transport = Transport::new(
            config.base_url.clone(),
            config.refresh_path.clone(),
            config.request_timeout(),
            store.clone(),
        )?;
        let refresher = Arc::new(RefreshEndpoint::new(transport.clone()));
        let refresh = Arc::new(RefreshCoordinator::new(refresher, store.clone()));
        let terminator = Arc::new(SessionTerminator::new(
            store,
            handler,
            config.login_route.clone(),
        ));

        Ok(Self {
            transport,
            refresh,
            terminator,
        })
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        self.transport.store()
    }

    pub fn session(&self) -> Session {
        self.store().session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().has_token()
    }

    /// Where the application should land: home when signed in, else login.
    pub fn landing_route(&self) -> &str {
        if self.is_authenticated() {
            HOME_ROUTE
        } else {
            self.terminator.entry_point()
        }
    }

    /// Number of refresh calls made by this client and its clones.
    pub fn refreshes_started(&self) -> u64 {
        self.refresh.refreshes_started()
    }

    // ===== Session lifecycle =====

    /// Sign in and store the issued access token.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let request =
            ApiRequest::post(LOGIN_PATH).json(json!({ "email": email, "password": password }));
        let result = self.send_unauthenticated(&request).await?;
        let login: LoginResult = serde_json::from_value(result)
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;

        self.store().set_access_token(&login.accesstoken)?;
        self.store().set_user(email)?;
        self.terminator.arm();
        info!("Signed in");

        Ok(self.session())
    }

    /// Create an account. Does not sign in.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(SIGNUP_PATH)
            .json(json!({ "name": name, "email": email, "password": password }));
        self.send_unauthenticated(&request).await?;
        info!("Account created");
        Ok(())
    }

    /// Forget the session and hand control to the login entry point.
    pub fn logout(&self) {
        self.terminator.terminate(TerminationReason::UserLogout);
    }

    async fn send_unauthenticated(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let completed = self.transport.send(request).await?;
        if completed.envelope.is_ok() {
            Ok(completed.envelope.into_result())
        } else {
            Err(completed.to_error())
        }
    }

    // ===== Authenticated pipeline =====

    /// Send a request and return the envelope's `result`.
    pub async fn send(&self, mut request: ApiRequest) -> Result<Value, ApiError> {
        let completed = self.transport.execute(&mut request).await?;

        match self.transport.classify(&request, &completed) {
            Classification::Success => Ok(completed.envelope.into_result()),
            Classification::OtherError => Err(completed.to_error()),
            Classification::SessionNotFound => Err(self.end_session(TerminationReason::SessionNotFound)),
            Classification::TerminalAuthFailure => {
                Err(self.end_session(TerminationReason::RefreshRejected))
            }
            Classification::RecoverableAuthFailure => {
                debug!(path = %request.path, "Access token rejected, refreshing");
                let pending = PendingRequest::new(request);

                let token = match self.refresh.acquire(pending.original_token()).await {
                    Ok(token) => token,
                    Err(RefreshFailure::SessionNotFound) => {
                        return Err(self.end_session(TerminationReason::SessionNotFound))
                    }
                    Err(RefreshFailure::Rejected(_) | RefreshFailure::Cleared) => {
                        return Err(self.end_session(TerminationReason::RefreshRejected))
                    }
                    Err(RefreshFailure::Unavailable(message)) => {
                        return Err(ApiError::RefreshUnavailable(message))
                    }
                };

                retry_once(&self.transport, &self.terminator, pending, &token).await
            }
        }
    }

    fn end_session(&self, reason: TerminationReason) -> ApiError {
        self.terminator.terminate(reason);
        ApiError::SessionEnded(reason)
    }

    /// Send a request and deserialize the envelope's `result`.
    pub async fn send_as<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let result = self.send(request).await?;
        serde_json::from_value(result)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_as(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_as(ApiRequest::post(path).json(Self::to_json(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_as(ApiRequest::put(path).json(Self::to_json(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_as(ApiRequest::delete(path)).await
    }

    fn to_json<B: Serialize>(body: &B) -> Result<Value, ApiError> {
        serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;

    fn client() -> ApiClient {
        let store = Arc::new(TokenStore::load(Arc::new(MemoryStore::new())).unwrap());
        let handler = |_: TerminationReason, _: &str| {};
        ApiClient::new(&Config::default(), store, Arc::new(handler)).unwrap()
    }

    #[test]
    fn test_landing_route_follows_session() {
        let client = client();
        assert!(!client.is_authenticated());
        assert_eq!(client.landing_route(), "/login");

        client.store().set_access_token("T1").unwrap();
        assert!(client.is_authenticated());
        assert_eq!(client.landing_route(), "/");
    }

    #[test]
    fn test_logout_clears_session() {
        let client = client();
        client.store().set_access_token("T1").unwrap();
        client.store().set_user("rider@example.com").unwrap();

        client.logout();
        assert!(!client.session().is_valid());
        assert_eq!(client.session().user_email, None);
    }

    #[test]
    fn test_clones_share_state() {
        let client = client();
        let other = client.clone();
        client.store().set_access_token("T1").unwrap();
        assert_eq!(other.store().access_token().as_deref(), Some("T1"));
    }
}
