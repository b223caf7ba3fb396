//! Single-flight token refresh.
//!
//! At most one refresh call is in flight at any instant. Callers that hit an
//! expired token while a refresh is running join it and receive the same
//! outcome. The new token is written to the [`TokenStore`] before any joiner
//! is released, so every request built afterwards carries it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::TokenStore;

use super::request::ApiRequest;
use super::response::Classification;
use super::transport::Transport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("session not found")]
    SessionNotFound,

    #[error("refresh rejected: {0}")]
    Rejected(String),

    /// The session was cleared after the request was sent, or while the
    /// refresh was in flight.
    #[error("session cleared")]
    Cleared,

    /// Transport or server trouble; says nothing about the session itself.
    #[error("{0}")]
    Unavailable(String),
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

/// Something that can obtain a new access token.
pub trait Refresh: Send + Sync + 'static {
    fn refresh(&self) -> BoxFuture<'static, RefreshOutcome>;
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

pub struct RefreshCoordinator {
    refresher: Arc<dyn Refresh>,
    store: Arc<TokenStore>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn Refresh>, store: Arc<TokenStore>) -> Self {
        Self {
            refresher,
            store,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
            started: AtomicU64::new(0),
        }
    }

    /// Number of refresh calls started so far.
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Obtain a fresh token for a request that was rejected while carrying
    /// `stale_token`.
    ///
    /// Joins the in-flight refresh if there is one. Otherwise, if the store
    /// already holds a different token, a refresh finished after the request
    /// was sent and that token is returned without calling the backend. If
    /// the store was emptied meanwhile, nothing is refreshed.
    pub async fn acquire(&self, stale_token: Option<&str>) -> RefreshOutcome {
        let future = {
            let mut slot = self.in_flight.lock().await;

            if let Some(in_flight) = slot.as_ref() {
                debug!(id = in_flight.id, "Joining in-flight token refresh");
                in_flight.future.clone()
            } else {
                let (current, generation) = self.store.snapshot();
                match (current, stale_token) {
                    (Some(current), stale) if stale != Some(current.as_str()) => {
                        debug!("Token already refreshed, skipping refresh");
                        return Ok(current);
                    }
                    (None, Some(_)) => {
                        debug!("Session cleared while request was in flight");
                        return Err(RefreshFailure::Cleared);
                    }
                    _ => {}
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = self.start(id, generation);
                *slot = Some(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    fn start(&self, id: u64, generation: u64) -> SharedRefresh {
        self.started.fetch_add(1, Ordering::Relaxed);
        info!(id, "Refreshing access token");

        let refresher = self.refresher.clone();
        let store = self.store.clone();
        let slot = self.in_flight.clone();

        async move {
            let outcome = match refresher.refresh().await {
                Ok(token) => match store.set_access_token_if(generation, &token) {
                    Ok(true) => {
                        info!(id, "Access token refreshed");
                        Ok(token)
                    }
                    Ok(false) => {
                        info!(id, "Session ended during refresh, discarding token");
                        Err(RefreshFailure::Cleared)
                    }
                    Err(e) => {
                        warn!(id, error = %e, "Failed to persist refreshed token");
                        Ok(token)
                    }
                },
                Err(e) => {
                    warn!(id, error = %e, "Token refresh failed");
                    Err(e)
                }
            };

            let mut slot = slot.lock().await;
            if slot.as_ref().is_some_and(|f| f.id == id) {
                *slot = None;
            }

            outcome
        }
        .boxed()
        .shared()
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResult {
    accesstoken: String,
}

/// The backend's refresh endpoint.
pub struct RefreshEndpoint {
    transport: Transport,
}

impl RefreshEndpoint {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

impl Refresh for RefreshEndpoint {
    fn refresh(&self) -> BoxFuture<'static, RefreshOutcome> {
        let transport = self.transport.clone();

        async move {
            let mut request = ApiRequest::get(transport.refresh_path()).refresh();
            let completed = transport
                .execute(&mut request)
                .await
                .map_err(|e| RefreshFailure::Unavailable(e.to_string()))?;

            match transport.classify(&request, &completed) {
                Classification::Success => {
                    let result: RefreshResult =
                        serde_json::from_value(completed.envelope.into_result()).map_err(|e| {
                            RefreshFailure::Unavailable(format!("malformed refresh response: {}", e))
                        })?;
                    Ok(result.accesstoken)
                }
                Classification::SessionNotFound => Err(RefreshFailure::SessionNotFound),
                Classification::TerminalAuthFailure | Classification::RecoverableAuthFailure => {
                    Err(RefreshFailure::Rejected(completed.envelope.error_message()))
                }
                Classification::OtherError => Err(RefreshFailure::Unavailable(
                    completed.envelope.error_message(),
                )),
            }
        }
        .boxed()
    }
}
