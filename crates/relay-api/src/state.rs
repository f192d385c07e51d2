//! Application state for the streaming front

use std::sync::Arc;

use relay_gateway::CapabilityRouter;

use crate::handlers::sse::SessionRegistry;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Shared catalog every front session routes through
    pub router: Arc<CapabilityRouter>,
    /// Open stream sessions
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(router: Arc<CapabilityRouter>) -> Self {
        Self {
            router,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}
