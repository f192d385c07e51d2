//! Protocol client shared by every transport
//!
//! Wraps an [`RpcPeer`] with the connect handshake, paginated listings and
//! per-kind invocation parameters.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::rpc::PROTOCOL_VERSION;
use relay_core::{BackendClient, CapabilityKind, GatewayError, GatewayResult};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::peer::RpcPeer;

/// How long a backend gets to answer `initialize`
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name the gateway introduces itself with to backends
pub const CLIENT_NAME: &str = "mcp-proxy-client";
pub const CLIENT_VERSION: &str = "1.0.0";

/// A handshaken session with one backend
pub struct McpBackendClient {
    name: String,
    peer: Arc<RpcPeer>,
    /// `capabilities` object from the initialize result
    server_capabilities: Value,
    /// Reader/stderr pumps owned by this session
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl McpBackendClient {
    /// Run `initialize` + `notifications/initialized` over an already wired
    /// peer.
    ///
    /// On failure the peer's transport is shut down and `tasks` are aborted,
    /// so callers never have to clean up after a failed attempt.
    pub async fn handshake(
        name: &str,
        peer: Arc<RpcPeer>,
        tasks: Vec<JoinHandle<()>>,
        init_timeout: Duration,
    ) -> GatewayResult<Self> {
        match Self::initialize(name, &peer, init_timeout).await {
            Ok(result) => {
                let server_capabilities = result
                    .get("capabilities")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let server = result
                    .get("serverInfo")
                    .and_then(|s| s.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!(backend = %name, server, "Backend handshake complete");

                Ok(Self {
                    name: name.to_string(),
                    peer,
                    server_capabilities,
                    tasks: Mutex::new(tasks),
                })
            }
            Err(e) => {
                if let Err(shutdown_err) = peer.shutdown().await {
                    debug!(backend = %name, error = %shutdown_err, "Transport shutdown after failed handshake");
                }
                for task in tasks {
                    task.abort();
                }
                Err(e)
            }
        }
    }

    async fn initialize(name: &str, peer: &RpcPeer, init_timeout: Duration) -> GatewayResult<Value> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "prompts": {},
                "resources": { "subscribe": true },
                "tools": {},
            },
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION,
            },
        });

        let connection_error = |reason: String| GatewayError::Connection {
            backend: name.to_string(),
            reason,
        };

        let result = tokio::time::timeout(init_timeout, peer.request("initialize", Some(params)))
            .await
            .map_err(|_| connection_error(format!("initialize timed out after {:?}", init_timeout)))?
            .map_err(|e| connection_error(e.to_string()))?;

        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            if version != PROTOCOL_VERSION {
                debug!(backend = %name, version, "Backend negotiated a different protocol version");
            }
        }

        peer.notify("notifications/initialized", None)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(result)
    }

    fn invoke_params(kind: CapabilityKind, name: &str, args: Value) -> Value {
        match kind {
            CapabilityKind::Resource => json!({ "uri": name }),
            CapabilityKind::Tool | CapabilityKind::Prompt => {
                let mut params = json!({ "name": name });
                if !args.is_null() {
                    params["arguments"] = args;
                }
                params
            }
        }
    }
}

#[async_trait]
impl BackendClient for McpBackendClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn advertises(&self, kind: CapabilityKind) -> bool {
        self.server_capabilities
            .get(kind.collection_key())
            .is_some_and(|v| !v.is_null())
    }

    async fn list(&self, kind: CapabilityKind) -> GatewayResult<Vec<Value>> {
        if !self.advertises(kind) {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = self.peer.request(kind.list_method(), params).await?;

            match page.get(kind.collection_key()).and_then(Value::as_array) {
                Some(page_items) => items.extend(page_items.iter().cloned()),
                None => {
                    return Err(GatewayError::Protocol(format!(
                        "{} result from '{}' has no '{}' array",
                        kind.list_method(),
                        self.name,
                        kind.collection_key()
                    )))
                }
            }

            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !seen_cursors.insert(next.to_string()) => {
                    warn!(backend = %self.name, kind = %kind, "Backend repeated a pagination cursor, stopping");
                    break;
                }
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        debug!(backend = %self.name, kind = %kind, count = items.len(), "Listed capabilities");
        Ok(items)
    }

    async fn invoke(&self, kind: CapabilityKind, name: &str, args: Value) -> GatewayResult<Value> {
        let params = Self::invoke_params(kind, name, args);
        self.peer
            .request(kind.invoke_method(), Some(params))
            .await
            .map_err(|e| e.with_owner(&self.name))
    }

    async fn closed(&self) {
        self.peer.closed().await;
    }

    async fn close(&self) -> GatewayResult<()> {
        let result = self.peer.shutdown().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        result
    }
}
