//! Backend sessions owned by the connection manager

use std::sync::Arc;

use parking_lot::RwLock;
use relay_core::{
    BackendClient, BackendDescriptor, CapabilityEntry, CapabilityKind, GatewayError,
    GatewayResult, SessionState,
};
use tracing::{debug, warn};

/// One connected backend: its identity, lifecycle state and live client
pub struct BackendSession {
    name: String,
    namespace: Option<String>,
    state: RwLock<SessionState>,
    client: Arc<dyn BackendClient>,
}

impl BackendSession {
    /// Wrap a client whose handshake just completed
    pub fn connected(descriptor: &BackendDescriptor, client: Arc<dyn BackendClient>) -> Self {
        Self {
            name: descriptor.name.clone(),
            namespace: descriptor.namespace().map(str::to_string),
            state: RwLock::new(SessionState::Connected),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    /// Move from `Connected` to `Disconnected`.
    ///
    /// Returns `false` when the session had already left `Connected`, so
    /// exactly one caller observes the transition.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.write();
        if !state.is_connected() {
            return false;
        }
        *state = SessionState::Disconnected;
        true
    }

    /// Query every advertised kind and build this session's capability entries.
    ///
    /// A failed listing of one kind is logged and skipped; the other kinds
    /// are still collected. Failures are returned alongside the entries.
    pub async fn refresh_capabilities(
        &self,
    ) -> (Vec<CapabilityEntry>, Vec<(CapabilityKind, GatewayError)>) {
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        for kind in CapabilityKind::ALL {
            if !self.client.advertises(kind) {
                continue;
            }
            match self.client.list(kind).await {
                Ok(items) => {
                    debug!(backend = %self.name, kind = %kind, count = items.len(), "Fetched listing");
                    entries.extend(items.into_iter().filter_map(|item| self.to_entry(kind, item)));
                }
                Err(e) => {
                    warn!(backend = %self.name, kind = %kind, error = %e, "Failed to list capabilities");
                    failures.push((kind, e));
                }
            }
        }

        (entries, failures)
    }

    fn to_entry(&self, kind: CapabilityKind, descriptor: serde_json::Value) -> Option<CapabilityEntry> {
        let Some(local_name) = descriptor
            .get(kind.name_field())
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            warn!(backend = %self.name, kind = %kind, "Listed item has no {}", kind.name_field());
            return None;
        };

        let namespace = if kind.namespaceable() {
            self.namespace()
        } else {
            None
        };

        Some(CapabilityEntry {
            qualified_name: relay_core::routing::qualified_name(&local_name, namespace),
            local_name,
            kind,
            owner: self.name.clone(),
            descriptor,
        })
    }

    /// Close the transport and mark the session `Disconnected`
    pub async fn close(&self) -> GatewayResult<()> {
        *self.state.write() = SessionState::Disconnected;
        self.client.close().await
    }
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
