//! Owning context for the backend side of the gateway
//!
//! [`Gateway`] wires the connection manager to the router, watches every
//! connected session for transport loss, and tears everything down in one
//! call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{BackendConnector, BackendDescriptor, Timer, TokioTimer};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::{ConnectionManager, RetryPolicy};
use crate::router::CapabilityRouter;
use crate::session::BackendSession;

/// Connection manager, router and disconnect watchers under one owner
pub struct Gateway {
    manager: ConnectionManager,
    router: Arc<CapabilityRouter>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Gateway {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self::with_timer(connector, Arc::new(TokioTimer))
    }

    pub fn with_timer(connector: Arc<dyn BackendConnector>, timer: Arc<dyn Timer>) -> Self {
        Self {
            manager: ConnectionManager::new(connector, timer),
            router: Arc::new(CapabilityRouter::new()),
            watchers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.manager = self.manager.with_policy(policy);
        self
    }

    /// Connect every backend in order, register what each one offers and
    /// start watching it. Returns the connected sessions.
    pub async fn start(&self, descriptors: &[BackendDescriptor]) -> Vec<Arc<BackendSession>> {
        let sessions = self.manager.connect_all(descriptors).await;

        for session in &sessions {
            self.router.on_connected(session).await;
            self.watch(session);
        }

        info!(
            backends = sessions.len(),
            capabilities = self.router.len(),
            "Gateway ready"
        );
        sessions
    }

    /// When the session's transport closes, mark it `Disconnected` and pull
    /// its entries from the catalog. The watcher only holds a weak handle to
    /// the session.
    fn watch(&self, session: &Arc<BackendSession>) {
        let client = session.client().clone();
        let weak = Arc::downgrade(session);
        let router = self.router.clone();

        let handle = tokio::spawn(async move {
            client.closed().await;

            let Some(session) = weak.upgrade() else {
                return;
            };
            if session.mark_disconnected() {
                warn!(backend = %session.name(), "Backend disconnected");
                router.on_disconnected(session.name());
            }
        });
        self.watchers.lock().push(handle);
    }

    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Close every backend session and empty the catalog.
    ///
    /// Front sessions must already be closed. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for watcher in self.watchers.lock().drain(..) {
            watcher.abort();
        }

        info!("Closing backend sessions");
        self.manager.close_all().await;
        self.router.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockConnector, RecordingTimer};
    use pretty_assertions::assert_eq;
    use relay_core::{CapabilityKind, GatewayError, SessionState};
    use serde_json::json;

    fn gateway(connector: MockConnector) -> Gateway {
        Gateway::with_timer(Arc::new(connector), Arc::new(RecordingTimer::new()))
    }

    #[tokio::test]
    async fn test_start_builds_catalog_from_connected_only() {
        let connector = MockConnector::new()
            .with_backend(MockBackend::new("a").with_tools(&["x"]))
            .with_flaky_backend(MockBackend::new("dead").with_tools(&["z"]), 3)
            .with_backend(MockBackend::new("b").with_tools(&["y"]).with_prompts(&["p"]));
        let gateway = gateway(connector);

        let sessions = gateway
            .start(&[
                MockConnector::descriptor("a"),
                MockConnector::descriptor("dead"),
                MockConnector::descriptor("b"),
            ])
            .await;

        assert_eq!(sessions.len(), 2);
        let tools: Vec<_> = gateway
            .router()
            .list_capabilities(CapabilityKind::Tool)
            .into_iter()
            .map(|e| e.qualified_name)
            .collect();
        assert_eq!(tools, vec!["x", "y"]);
        assert!(gateway.router().lookup(CapabilityKind::Tool, "z").is_none());
    }

    #[tokio::test]
    async fn test_transport_loss_unregisters_backend() {
        let a = MockBackend::new("a").with_tools(&["x"]);
        let a_handle = a.handle();
        let connector = MockConnector::new()
            .with_backend(a)
            .with_backend(MockBackend::new("b").with_tools(&["y"]));
        let gateway = gateway(connector);
        gateway
            .start(&[MockConnector::descriptor("a"), MockConnector::descriptor("b")])
            .await;

        a_handle.disconnect();
        while gateway.router().len() != 1 {
            tokio::task::yield_now().await;
        }

        assert_eq!(gateway.manager().state_of("a"), Some(SessionState::Disconnected));
        let err = gateway
            .router()
            .invoke("x", CapabilityKind::Tool, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        let ok = gateway
            .router()
            .invoke("y", CapabilityKind::Tool, json!({}))
            .await
            .unwrap();
        assert_eq!(ok["backend"], "b");
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_once() {
        let a = MockBackend::new("a").with_tools(&["x"]);
        let b = MockBackend::new("b").failing_close();
        let (a_handle, b_handle) = (a.handle(), b.handle());
        let gateway = gateway(MockConnector::new().with_backend(a).with_backend(b));
        gateway
            .start(&[MockConnector::descriptor("a"), MockConnector::descriptor("b")])
            .await;

        gateway.shutdown().await;
        gateway.shutdown().await;

        assert_eq!(a_handle.close_count(), 1);
        assert_eq!(b_handle.close_count(), 1);
        assert!(gateway.router().is_empty());
    }
}
