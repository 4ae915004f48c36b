//! Session expiry tracking.
//!
//! The first 401 from the backend marks the session expired. Reads then fail
//! fast with `Unauthorized` until the session is renewed.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired { reason: String },
}

#[derive(Clone)]
pub struct SessionMonitor {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Active);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_expired(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Expired { .. })
    }

    /// Mark the session expired. Only the first call is reported.
    pub fn expire(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.state.send_if_modified(|state| match state {
            SessionState::Active => {
                *state = SessionState::Expired {
                    reason: reason.clone(),
                };
                true
            }
            SessionState::Expired { .. } => false,
        });
        if changed {
            warn!(reason = %reason, "Admin session expired, sign-in required");
        }
    }

    pub fn renew(&self) {
        self.state.send_replace(SessionState::Active);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}
