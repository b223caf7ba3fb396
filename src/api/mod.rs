//! REST API client module for the Routewise backend.
//!
//! Every request flows through the same pipeline:
//! interceptor (bearer token) → transport → classifier → either the caller,
//! the single-flight refresh plus one retry, or the session terminator.
//!
//! The backend wraps every response in an envelope
//! `{ status, result | error, statusCode }`; `statusCode` 401 means the access
//! token expired, 404 means the session itself is gone.

pub mod client;
pub mod cookies;
pub mod error;
pub mod refresh;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use client::ApiClient;
pub use cookies::SessionCookies;
pub use error::ApiError;
pub use refresh::{Refresh, RefreshCoordinator, RefreshFailure};
pub use request::{attach_bearer, intercept, ApiRequest, Body};
pub use response::{classify, Classification, Envelope};
