//! Cookie jar that survives restarts.
//!
//! The backend hands out its refresh credential as an HTTP-only cookie. The
//! jar is reqwest's own [`Jar`]; every time the backend sets cookies, the
//! ones that would be sent to the refresh endpoint are mirrored into the
//! [`TokenStore`] and restored from there on the next start. Clearing the
//! session drops them along with the token.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use tracing::{debug, warn};

use crate::auth::TokenStore;

pub struct SessionCookies {
    jar: Jar,
    store: Arc<TokenStore>,
    /// URL of the refresh endpoint; cookies are saved for this scope.
    scope: Url,
}

impl SessionCookies {
    /// Build a jar seeded with whatever cookies the store saved.
    pub fn restore(store: Arc<TokenStore>, scope: Url) -> Self {
        let jar = Jar::default();
        if let Some(saved) = store.session_cookies() {
            for pair in saved.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &scope);
            }
            debug!("Restored session cookies");
        }
        Self { jar, store, scope }
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar.set_cookies(cookie_headers, url);

        let current = self.jar.cookies(&self.scope);
        let value = current.as_ref().and_then(|v| v.to_str().ok());
        if let Err(e) = self.store.set_session_cookies(value) {
            warn!(error = %e, "Failed to persist session cookies");
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        // Nothing is sent once the session has been cleared.
        self.store.session_cookies()?;
        self.jar.cookies(url)
    }
}
