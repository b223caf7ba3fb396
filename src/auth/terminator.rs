use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::session::TokenStore;

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The backend no longer knows the session behind the refresh credential.
    SessionNotFound,
    /// The refresh endpoint itself rejected the request.
    RefreshRejected,
    /// A request retried with a fresh token was rejected again.
    RetryRejected,
    /// The user signed out.
    UserLogout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SessionNotFound => "session not found",
            Self::RefreshRejected => "token refresh rejected",
            Self::RetryRejected => "request rejected after token refresh",
            Self::UserLogout => "signed out",
        };
        f.write_str(text)
    }
}

/// The application's unauthenticated entry point.
///
/// Invoked once per logical logout. Implementations should reset the
/// application to its logged-out experience; callers that triggered the
/// logout get an error back and should not expect to continue normally.
pub trait SessionHandler: Send + Sync {
    fn on_session_ended(&self, reason: TerminationReason, entry_point: &str);
}

impl<F> SessionHandler for F
where
    F: Fn(TerminationReason, &str) + Send + Sync,
{
    fn on_session_ended(&self, reason: TerminationReason, entry_point: &str) {
        self(reason, entry_point)
    }
}

/// Clears credentials and hands control to the unauthenticated entry point.
pub struct SessionTerminator {
    store: Arc<TokenStore>,
    handler: Arc<dyn SessionHandler>,
    entry_point: String,
    // true while a logical session is live and its logout hasn't fired yet
    armed: AtomicBool,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<TokenStore>,
        handler: Arc<dyn SessionHandler>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            store,
            handler,
            entry_point: entry_point.into(),
            armed: AtomicBool::new(true),
        }
    }

    /// Start a new logical session; the next `terminate` will notify again.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// End the session. Safe to call any number of times from any number of
    /// tasks: the store is always cleared, the handler runs at most once
    /// until the next [`arm`](Self::arm). Returns whether this call notified.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        if self.armed.swap(false, Ordering::AcqRel) {
            if reason == TerminationReason::UserLogout {
                info!(entry_point = %self.entry_point, "Signed out");
            } else {
                warn!(%reason, entry_point = %self.entry_point, "Session ended");
            }
            self.handler.on_session_ended(reason, &self.entry_point);
            true
        } else {
            debug!(%reason, "Session already ended");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        reasons: Mutex<Vec<TerminationReason>>,
    }

    impl SessionHandler for Recorder {
        fn on_session_ended(&self, reason: TerminationReason, entry_point: &str) {
            assert_eq!(entry_point, "/login");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reasons.lock().unwrap().push(reason);
        }
    }

    fn terminator() -> (Arc<TokenStore>, Arc<Recorder>, SessionTerminator) {
        let store = Arc::new(TokenStore::load(Arc::new(MemoryStore::new())).unwrap());
        store.set_access_token("T1").unwrap();
        let recorder = Arc::new(Recorder::default());
        let terminator = SessionTerminator::new(store.clone(), recorder.clone(), "/login");
        (store, recorder, terminator)
    }

    #[test]
    fn test_terminate_clears_and_notifies_once() {
        let (store, recorder, terminator) = terminator();

        assert!(terminator.terminate(TerminationReason::SessionNotFound));
        assert!(!terminator.terminate(TerminationReason::RefreshRejected));

        assert_eq!(store.access_token(), None);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.reasons.lock().unwrap(),
            vec![TerminationReason::SessionNotFound]
        );
    }

    #[test]
    fn test_concurrent_terminate_notifies_once() {
        let (store, recorder, terminator) = terminator();
        let terminator = Arc::new(terminator);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let t = terminator.clone();
                std::thread::spawn(move || t.terminate(TerminationReason::RetryRejected))
            })
            .collect();
        let notified = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|n| *n)
            .count();

        assert_eq!(notified, 1);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert!(!store.has_token());
    }

    #[test]
    fn test_arm_allows_next_logout() {
        let (store, recorder, terminator) = terminator();
        terminator.terminate(TerminationReason::UserLogout);

        store.set_access_token("T2").unwrap();
        terminator.arm();
        terminator.terminate(TerminationReason::SessionNotFound);

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closure_handler() {
        let store = Arc::new(TokenStore::load(Arc::new(MemoryStore::new())).unwrap());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = move |_: TerminationReason, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        let terminator = SessionTerminator::new(store, Arc::new(handler), "/login");

        terminator.terminate(TerminationReason::UserLogout);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(TerminationReason::SessionNotFound.to_string(), "session not found");
        assert_eq!(TerminationReason::UserLogout.to_string(), "signed out");
    }
}
