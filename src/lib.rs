//! Routewise client core.
//!
//! Authenticated access to the Routewise backend: callers issue requests and
//! never see token lifecycle. Expired access tokens are refreshed once per
//! burst of failures and the original requests retried; sessions that cannot
//! be recovered are cleared and handed to the application's login entry point.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{Session, SessionHandler, TerminationReason, TokenStore};
pub use config::Config;
