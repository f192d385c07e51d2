//! Backend connection lifecycle
//!
//! Backends are connected one after another in descriptor order. Each one
//! runs through a small state machine:
//!
//! ```text
//! Connecting ──ok──▶ Connected
//!     │  ▲
//!  err│  │backoff elapsed
//!     ▼  │
//! Retrying(n) ──n == max_attempts──▶ Failed
//! ```
//!
//! A descriptor whose transport cannot be constructed goes straight to
//! `Failed` without spending any attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use relay_core::{BackendConnector, BackendDescriptor, GatewayError, SessionState, Timer};
use tracing::{debug, info, warn};

use crate::session::BackendSession;

/// Retry budget for connecting one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first one
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(2500),
        }
    }
}

/// Connect-attempt state machine for a single backend.
///
/// Pure bookkeeping: it never sleeps or does I/O, the manager drives it.
#[derive(Debug, Clone)]
pub struct ConnectAttempts {
    policy: RetryPolicy,
    state: SessionState,
    failures: u32,
}

impl ConnectAttempts {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: SessionState::Connecting,
            failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failed attempts so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn succeed(&mut self) -> SessionState {
        self.state = SessionState::Connected;
        self.state
    }

    /// Record a failed attempt: `Retrying(n)` while budget remains,
    /// `Failed` once it is spent
    pub fn fail(&mut self) -> SessionState {
        self.failures += 1;
        self.state = if self.failures < self.policy.max_attempts {
            SessionState::Retrying(self.failures)
        } else {
            SessionState::Failed
        };
        self.state
    }

    /// Transport could not be built; no attempt is consumed
    pub fn abandon(&mut self) -> SessionState {
        self.state = SessionState::Failed;
        self.state
    }

    /// Backoff elapsed, go again
    pub fn retry(&mut self) -> SessionState {
        if matches!(self.state, SessionState::Retrying(_)) {
            self.state = SessionState::Connecting;
        }
        self.state
    }
}

/// Owns every backend session and drives their connect/close lifecycle
pub struct ConnectionManager {
    connector: Arc<dyn BackendConnector>,
    timer: Arc<dyn Timer>,
    policy: RetryPolicy,
    sessions: RwLock<Vec<Arc<BackendSession>>>,
    /// Final connect state of every descriptor seen, by name
    outcomes: RwLock<HashMap<String, SessionState>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BackendConnector>, timer: Arc<dyn Timer>) -> Self {
        Self {
            connector,
            timer,
            policy: RetryPolicy::default(),
            sessions: RwLock::new(Vec::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Connect every descriptor, sequentially and in order.
    ///
    /// Returns only the sessions that reached `Connected`; failed backends
    /// are logged and dropped without affecting the others.
    pub async fn connect_all(&self, descriptors: &[BackendDescriptor]) -> Vec<Arc<BackendSession>> {
        let mut connected = Vec::new();

        for descriptor in descriptors {
            match self.connect(descriptor).await {
                Ok(session) => connected.push(session),
                Err(e) => {
                    warn!(backend = %descriptor.name, error = %e, "Backend dropped");
                }
            }
        }

        info!(
            connected = connected.len(),
            configured = descriptors.len(),
            "Backend startup complete"
        );
        connected
    }

    /// Run the state machine for one descriptor until it settles
    pub async fn connect(&self, descriptor: &BackendDescriptor) -> Result<Arc<BackendSession>, GatewayError> {
        let name = descriptor.name.as_str();
        let mut attempts = ConnectAttempts::new(self.policy);
        self.record(name, attempts.state());

        loop {
            info!(backend = %name, transport = descriptor.transport.kind(), attempt = attempts.failures() + 1, "Connecting to backend");

            let pending = match self.connector.prepare(descriptor) {
                Ok(pending) => pending,
                Err(e) => {
                    self.record(name, attempts.abandon());
                    return Err(e);
                }
            };

            let error = match pending.connect().await {
                Ok(client) => {
                    self.record(name, attempts.succeed());
                    let session = Arc::new(BackendSession::connected(descriptor, client));
                    self.sessions.write().push(session.clone());
                    info!(backend = %name, "Backend connected");
                    return Ok(session);
                }
                Err(e) => e,
            };

            match attempts.fail() {
                SessionState::Retrying(failures) => {
                    self.record(name, SessionState::Retrying(failures));
                    warn!(
                        backend = %name,
                        attempt = failures,
                        max_attempts = self.policy.max_attempts,
                        error = %error,
                        "Connect attempt failed, retrying in {:?}",
                        self.policy.backoff
                    );
                    self.timer.sleep(self.policy.backoff).await;
                    self.record(name, attempts.retry());
                }
                state => {
                    self.record(name, state);
                    warn!(
                        backend = %name,
                        attempts = attempts.failures(),
                        error = %error,
                        "Giving up on backend"
                    );
                    return Err(error);
                }
            }
        }
    }

    fn record(&self, name: &str, state: SessionState) {
        debug!(backend = %name, state = %state, "Backend state");
        self.outcomes.write().insert(name.to_string(), state);
    }

    /// Last known state of the backend called `name`.
    ///
    /// For connected sessions this reflects later disconnects too.
    pub fn state_of(&self, name: &str) -> Option<SessionState> {
        if let Some(session) = self.sessions.read().iter().find(|s| s.name() == name) {
            return Some(session.state());
        }
        self.outcomes.read().get(name).copied()
    }

    /// Sessions that reached `Connected`, in connection order
    pub fn sessions(&self) -> Vec<Arc<BackendSession>> {
        self.sessions.read().clone()
    }

    /// Close every session that is still connected.
    ///
    /// Close failures are logged and swallowed so one stuck backend never
    /// blocks the teardown of the rest.
    pub async fn close_all(&self) {
        let sessions = self.sessions();

        for session in sessions.iter().filter(|s| s.is_connected()) {
            match session.close().await {
                Ok(()) => info!(backend = %session.name(), "Backend closed"),
                Err(e) => warn!(backend = %session.name(), error = %e, "Failed to close backend"),
            }
        }
    }
}
