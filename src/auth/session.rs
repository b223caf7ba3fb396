use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::credentials::{CredentialStore, StoreError};

/// Key holding the current access token
pub const KEY_ACCESS_TOKEN: &str = "access_token";

/// Key holding the email of the signed-in user
pub const KEY_USER_EMAIL: &str = "user_email";

/// Key holding the RFC 3339 timestamp of the last sign-in
pub const KEY_SIGNED_IN_AT: &str = "signed_in_at";

/// Key holding the cookies the backend set for the refresh call
pub const KEY_SESSION_COOKIES: &str = "session_cookies";

/// Snapshot of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub user_email: Option<String>,
    pub signed_in_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A session is valid while it holds a non-empty access token.
    pub fn is_valid(&self) -> bool {
        self.access_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Cached {
    token: Option<String>,
    cookies: Option<String>,
    /// Bumped on every [`TokenStore::clear`].
    generation: u64,
}

/// Owner of the access token.
///
/// The token is read from the backing [`CredentialStore`] once at startup and
/// cached behind a lock so the request path never touches storage. Writes go
/// to both, under the write lock, so readers never see a token older than the
/// one last persisted.
///
/// Every `clear` starts a new generation. Writers that raced a logout use
/// [`TokenStore::set_access_token_if`] and lose.
pub struct TokenStore {
    backend: Arc<dyn CredentialStore>,
    cached: RwLock<Cached>,
}

impl TokenStore {
    /// Initialize from whatever the backing store holds.
    pub fn load(backend: Arc<dyn CredentialStore>) -> Result<Self, StoreError> {
        let token = backend
            .get(KEY_ACCESS_TOKEN)?
            .filter(|t| !t.is_empty());
        let cookies = backend
            .get(KEY_SESSION_COOKIES)?
            .filter(|c| !c.is_empty());
        debug!(
            has_token = token.is_some(),
            has_cookies = cookies.is_some(),
            "Token store loaded"
        );

        Ok(Self {
            backend,
            cached: RwLock::new(Cached {
                token,
                cookies,
                generation: 0,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Cached> {
        self.cached.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Cached> {
        self.cached.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current access token, if any. Never blocks on storage.
    pub fn access_token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn has_token(&self) -> bool {
        self.read().token.is_some()
    }

    /// Current token together with the generation it belongs to.
    pub fn snapshot(&self) -> (Option<String>, u64) {
        let cached = self.read();
        (cached.token.clone(), cached.generation)
    }

    /// Replace the access token.
    ///
    /// The in-memory token is updated even when persisting fails, so the
    /// running process keeps using the newest token.
    pub fn set_access_token(&self, token: &str) -> Result<(), StoreError> {
        let mut cached = self.write();
        cached.token = Some(token.to_string());
        self.backend.set(KEY_ACCESS_TOKEN, token)
    }

    /// Replace the access token only if the session has not been cleared
    /// since `generation` was observed. Returns `false` without writing
    /// otherwise.
    pub fn set_access_token_if(&self, generation: u64, token: &str) -> Result<bool, StoreError> {
        let mut cached = self.write();
        if cached.generation != generation {
            return Ok(false);
        }
        cached.token = Some(token.to_string());
        self.backend.set(KEY_ACCESS_TOKEN, token)?;
        Ok(true)
    }

    /// Record who signed in and when.
    pub fn set_user(&self, email: &str) -> Result<(), StoreError> {
        self.backend.set(KEY_USER_EMAIL, email)?;
        self.backend
            .set(KEY_SIGNED_IN_AT, &Utc::now().to_rfc3339())
    }

    pub fn user_email(&self) -> Option<String> {
        match self.backend.get(KEY_USER_EMAIL) {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "Failed to read user email");
                None
            }
        }
    }

    /// Cookie header value saved for the refresh call.
    pub fn session_cookies(&self) -> Option<String> {
        self.read().cookies.clone()
    }

    /// Save (or with `None`, forget) the cookies for the refresh call.
    pub fn set_session_cookies(&self, cookies: Option<&str>) -> Result<(), StoreError> {
        let cookies = cookies.filter(|c| !c.is_empty());
        let mut cached = self.write();
        cached.cookies = cookies.map(str::to_string);
        match cookies {
            Some(value) => self.backend.set(KEY_SESSION_COOKIES, value),
            None => self.backend.remove(KEY_SESSION_COOKIES),
        }
    }

    pub fn session(&self) -> Session {
        let signed_in_at = self
            .backend
            .get(KEY_SIGNED_IN_AT)
            .ok()
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Session {
            access_token: self.access_token(),
            user_email: self.user_email(),
            signed_in_at,
        }
    }

    /// Forget the session. The in-memory state is dropped first so that no
    /// request built after this call carries it, even if storage fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut cached = self.write();
        cached.token = None;
        cached.cookies = None;
        cached.generation += 1;

        let mut first_error = None;
        for key in [
            KEY_ACCESS_TOKEN,
            KEY_USER_EMAIL,
            KEY_SIGNED_IN_AT,
            KEY_SESSION_COOKIES,
        ] {
            if let Err(e) = self.backend.remove(key) {
                warn!(key, error = %e, "Failed to remove stored session value");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
