//! Scripted in-memory backends for tests
//!
//! [`MockConnector`] hands out [`MockBackend`]s by descriptor name and can be
//! scripted to fail a number of connect attempts, or to fail transport
//! construction outright. [`RecordingTimer`] records backoff pauses instead
//! of sleeping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    BackendClient, BackendConnector, BackendDescriptor, CapabilityKind, GatewayError,
    GatewayResult, PendingConnection, ProcessConfig, Timer, TransportConfig,
};
use serde_json::{json, Value};
use tokio::sync::watch;

/// One invocation received by a mock backend
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub backend: String,
    pub kind: CapabilityKind,
    pub name: String,
    pub args: Value,
}

/// In-memory backend with a fixed capability listing.
///
/// `invoke` echoes `{backend, name, arguments}` unless the name was
/// scripted to fail or to hang until the backend disconnects.
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    listings: HashMap<CapabilityKind, Vec<Value>>,
    failing_lists: HashSet<CapabilityKind>,
    errors: HashMap<String, (i64, String)>,
    hanging: HashSet<String>,
    close_fails: bool,
    handle: MockHandle,
}

/// Test-side view of a [`MockBackend`] after it has been handed out
#[derive(Clone)]
pub struct MockHandle {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    closed_tx: Arc<watch::Sender<bool>>,
    close_count: Arc<AtomicUsize>,
}

impl MockHandle {
    /// Simulate the transport dropping
    pub fn disconnect(&self) {
        self.closed_tx.send_replace(true);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            listings: HashMap::new(),
            failing_lists: HashSet::new(),
            errors: HashMap::new(),
            hanging: HashSet::new(),
            close_fails: false,
            handle: MockHandle {
                calls: Arc::new(Mutex::new(Vec::new())),
                closed_tx: Arc::new(closed_tx),
                close_count: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    fn with_items(mut self, kind: CapabilityKind, items: Vec<Value>) -> Self {
        self.listings.entry(kind).or_default().extend(items);
        self
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        let items = names
            .iter()
            .map(|n| json!({"name": n, "inputSchema": {"type": "object"}}))
            .collect();
        self.with_items(CapabilityKind::Tool, items)
    }

    pub fn with_raw_tools(self, items: Vec<Value>) -> Self {
        self.with_items(CapabilityKind::Tool, items)
    }

    pub fn with_resources(self, uris: &[&str]) -> Self {
        let items = uris.iter().map(|u| json!({"uri": u, "name": u})).collect();
        self.with_items(CapabilityKind::Resource, items)
    }

    pub fn with_prompts(self, names: &[&str]) -> Self {
        let items = names.iter().map(|n| json!({"name": n})).collect();
        self.with_items(CapabilityKind::Prompt, items)
    }

    /// Listing of `kind` fails with a transport error
    pub fn failing_list(mut self, kind: CapabilityKind) -> Self {
        self.listings.entry(kind).or_default();
        self.failing_lists.insert(kind);
        self
    }

    /// Invoking `name` returns a backend-reported error
    pub fn with_error(mut self, name: &str, code: i64, message: &str) -> Self {
        self.errors
            .insert(name.to_string(), (code, message.to_string()));
        self
    }

    /// Invoking `name` never answers; the call resolves once the backend
    /// disconnects
    pub fn hanging(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    async fn wait_closed(&self) {
        let mut rx = self.handle.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn advertises(&self, kind: CapabilityKind) -> bool {
        self.listings.contains_key(&kind)
    }

    async fn list(&self, kind: CapabilityKind) -> GatewayResult<Vec<Value>> {
        if self.failing_lists.contains(&kind) {
            return Err(GatewayError::Transport(format!("{} listing failed", kind)));
        }
        Ok(self.listings.get(&kind).cloned().unwrap_or_default())
    }

    async fn invoke(&self, kind: CapabilityKind, name: &str, args: Value) -> GatewayResult<Value> {
        if self.handle.is_closed() {
            return Err(GatewayError::BackendUnavailable(self.name.clone()));
        }

        self.handle.calls.lock().push(RecordedCall {
            backend: self.name.clone(),
            kind,
            name: name.to_string(),
            args: args.clone(),
        });

        if self.hanging.contains(name) {
            self.wait_closed().await;
            return Err(GatewayError::BackendUnavailable(self.name.clone()));
        }

        if let Some((code, message)) = self.errors.get(name) {
            return Err(GatewayError::BackendReported {
                backend: self.name.clone(),
                code: *code,
                message: message.clone(),
                data: None,
            });
        }

        Ok(json!({"backend": self.name, "name": name, "arguments": args}))
    }

    async fn closed(&self) {
        self.wait_closed().await;
    }

    async fn close(&self) -> GatewayResult<()> {
        self.handle.close_count.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            return Err(GatewayError::Transport(format!("{} refused to close", self.name)));
        }
        self.handle.disconnect();
        Ok(())
    }
}

enum Script {
    /// Fail this many connect attempts, then hand out the backend
    Flaky { failures: u32, backend: MockBackend },
    /// Transport construction fails
    Uncreatable,
}

#[derive(Default)]
struct ConnectorState {
    scripts: HashMap<String, Script>,
    attempts: HashMap<String, u32>,
    /// `"start:<name>"` / `"end:<name>"` markers in execution order
    events: Vec<String>,
}

/// Connector handing out scripted mock backends
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend connects on the first attempt
    pub fn with_backend(self, backend: MockBackend) -> Self {
        self.with_flaky_backend(backend, 0)
    }

    /// Backend fails `failures` connect attempts before succeeding
    pub fn with_flaky_backend(self, backend: MockBackend, failures: u32) -> Self {
        let name = backend.name.clone();
        self.state
            .lock()
            .scripts
            .insert(name, Script::Flaky { failures, backend });
        self
    }

    /// Transport for `name` cannot be constructed
    pub fn with_uncreatable(self, name: &str) -> Self {
        self.state
            .lock()
            .scripts
            .insert(name.to_string(), Script::Uncreatable);
        self
    }

    /// Connect attempts made for `name`
    pub fn attempts(&self, name: &str) -> u32 {
        self.state.lock().attempts.get(name).copied().unwrap_or(0)
    }

    /// Start/end markers of every connect attempt, in order
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    /// Process descriptor pointing nowhere; the mock ignores the transport
    pub fn descriptor(name: &str) -> BackendDescriptor {
        Self::descriptor_with_namespace(name, false)
    }

    pub fn descriptor_with_namespace(name: &str, namespace: bool) -> BackendDescriptor {
        BackendDescriptor {
            name: name.to_string(),
            transport: TransportConfig::Process(ProcessConfig {
                command: "mock".to_string(),
                args: Vec::new(),
                env: None,
            }),
            namespace,
        }
    }
}

impl BackendConnector for MockConnector {
    fn prepare(&self, descriptor: &BackendDescriptor) -> GatewayResult<Box<dyn PendingConnection>> {
        let state = self.state.lock();
        match state.scripts.get(&descriptor.name) {
            Some(Script::Flaky { .. }) => Ok(Box::new(MockPending {
                name: descriptor.name.clone(),
                state: self.state.clone(),
            })),
            Some(Script::Uncreatable) | None => Err(GatewayError::TransportCreation {
                backend: descriptor.name.clone(),
                reason: "no transport scripted".to_string(),
            }),
        }
    }
}

struct MockPending {
    name: String,
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl PendingConnection for MockPending {
    async fn connect(self: Box<Self>) -> GatewayResult<Arc<dyn BackendClient>> {
        let attempt = {
            let mut state = self.state.lock();
            state.events.push(format!("start:{}", self.name));
            let attempt = state.attempts.entry(self.name.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };

        // give any concurrently scheduled connect a chance to interleave
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.events.push(format!("end:{}", self.name));
        match state.scripts.get(&self.name) {
            Some(Script::Flaky { failures, .. }) if attempt <= *failures => {
                Err(GatewayError::Connection {
                    backend: self.name.clone(),
                    reason: format!("scripted failure {}", attempt),
                })
            }
            Some(Script::Flaky { backend, .. }) => Ok(Arc::new(backend.clone())),
            _ => Err(GatewayError::Internal("script vanished".to_string())),
        }
    }
}

/// [`Timer`] that records requested pauses and returns immediately
#[derive(Default)]
pub struct RecordingTimer {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Timer for RecordingTimer {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}
