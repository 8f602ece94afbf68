//! The pending login between `start_login` and `finish_login`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::pkce::{random_url_safe, PkceVerifier};
use crate::error::{protocol_error, Error, ProtocolCategory};

/// Values generated for one authorization request.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub state: String,
    pub nonce: String,
    pub verifier: PkceVerifier,
    pub expires_at: DateTime<Utc>,
}

/// Holds at most one pending login.
///
/// Starting a new login replaces any earlier one, so a late callback from an
/// abandoned window fails the state check.
pub struct StateManager {
    pending: Mutex<Option<PendingLogin>>,
    ttl: Duration,
}

impl StateManager {
    /// Pending logins expire after 10 minutes.
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(10))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            ttl,
        }
    }

    /// Generate and record a fresh state, nonce and PKCE verifier.
    pub fn begin(&self) -> PendingLogin {
        let pending = PendingLogin {
            state: random_url_safe(32),
            nonce: random_url_safe(32),
            verifier: PkceVerifier::generate(),
            expires_at: Utc::now() + self.ttl,
        };
        *self.lock() = Some(pending.clone());
        pending
    }

    /// Consume the pending login if `state` matches it.
    ///
    /// The pending login is removed whatever the outcome.
    pub fn take(&self, state: Option<&str>) -> Result<PendingLogin, Error> {
        let pending = self.lock().take().ok_or_else(|| {
            protocol_error(
                ProtocolCategory::Authorization,
                "no_pending_login",
                Some("No login request is in progress".to_string()),
                0,
            )
        })?;

        if state != Some(pending.state.as_str()) {
            return Err(protocol_error(
                ProtocolCategory::Authorization,
                "state_mismatch",
                Some("The response state does not match the request state".to_string()),
                0,
            ));
        }
        if Utc::now() > pending.expires_at {
            return Err(protocol_error(
                ProtocolCategory::Authorization,
                "login_expired",
                Some("The login request expired before a response was received".to_string()),
                0,
            ));
        }
        Ok(pending)
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingLogin>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
