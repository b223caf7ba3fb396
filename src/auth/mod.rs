//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: key-value storage for session values (keychain, file, memory)
//! - `TokenStore`: the owned access token with an explicit lifecycle
//! - `SessionTerminator`: idempotent logout that hands control to the login entry point

pub mod credentials;
pub mod session;
pub mod terminator;

pub use credentials::{CredentialStore, FileStore, KeyringStore, MemoryStore, StoreError};
pub use session::{Session, TokenStore, KEY_ACCESS_TOKEN, KEY_SESSION_COOKIES, KEY_USER_EMAIL};
pub use terminator::{SessionHandler, SessionTerminator, TerminationReason};
