//! JSON-RPC request/response correlation.
//!
//! A [`RpcPeer`] sits between a transport's outbound sink and its inbound
//! reader task. Outgoing requests get a fresh id and a oneshot slot; the
//! reader hands every incoming frame to [`RpcPeer::dispatch`], which routes
//! responses to their slot. When the reader reaches end-of-stream it calls
//! [`RpcPeer::mark_closed`]: every outstanding call then resolves with
//! `BackendUnavailable` and [`RpcPeer::closed`] returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::rpc::error_codes;
use relay_core::{
    GatewayError, GatewayResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

/// Outbound half of a transport: delivers one serialized frame
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: String) -> GatewayResult<()>;

    /// Release the transport (kill the child, drop the stream)
    async fn shutdown(&self) -> GatewayResult<()>;
}

#[derive(Default)]
struct PeerState {
    pending: HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// Correlates requests with responses for one backend
pub struct RpcPeer {
    backend: String,
    next_id: AtomicI64,
    state: Mutex<PeerState>,
    closed_tx: watch::Sender<bool>,
    sink: Arc<dyn FrameSink>,
}

impl RpcPeer {
    pub fn new(backend: &str, sink: Arc<dyn FrameSink>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            backend: backend.to_string(),
            next_id: AtomicI64::new(1),
            state: Mutex::new(PeerState::default()),
            closed_tx,
            sink,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Send a request and wait for its response.
    ///
    /// No timeout is applied here; a call stays outstanding until the
    /// backend answers or the transport closes.
    pub async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(GatewayError::BackendUnavailable(self.backend.clone()));
            }
            state.pending.insert(id.clone(), tx);
        }

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let frame = serde_json::to_string(&request)
            .map_err(|e| GatewayError::Internal(format!("failed to serialize request: {}", e)))?;

        if let Err(e) = self.sink.send_frame(frame).await {
            self.state.lock().pending.remove(&id);
            if self.is_closed() {
                return Err(GatewayError::BackendUnavailable(self.backend.clone()));
            }
            return Err(e);
        }

        match rx.await {
            Ok(response) => response.into_result(&self.backend),
            // slot dropped by mark_closed
            Err(_) => Err(GatewayError::BackendUnavailable(self.backend.clone())),
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        let frame = serde_json::to_string(&JsonRpcRequest::notification(method, params))
            .map_err(|e| GatewayError::Internal(format!("failed to serialize notification: {}", e)))?;
        self.sink.send_frame(frame).await
    }

    /// Route one inbound frame
    pub async fn dispatch(&self, frame: &str) {
        let frame = frame.trim();
        if frame.is_empty() {
            return;
        }

        let message = match JsonRpcMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                // Not JSON-RPC; child processes sometimes log to stdout
                trace!(backend = %self.backend, error = %e, "Ignoring non JSON-RPC frame");
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                let slot = self.state.lock().pending.remove(&response.id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(backend = %self.backend, id = %response.id, "Response for unknown request id");
                    }
                }
            }
            JsonRpcMessage::Request(request) => self.answer_backend_request(request).await,
        }
    }

    /// Backends may ping us or send notifications; anything else is refused
    async fn answer_backend_request(&self, request: JsonRpcRequest) {
        let Some(id) = request.id else {
            trace!(backend = %self.backend, method = %request.method, "Backend notification");
            return;
        };

        let response = if request.method == "ping" {
            JsonRpcResponse::success(id, serde_json::json!({}))
        } else {
            JsonRpcResponse::failure(
                id,
                JsonRpcError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("Method not supported by gateway: {}", request.method),
                    data: None,
                },
            )
        };

        match serde_json::to_string(&response) {
            Ok(frame) => {
                if let Err(e) = self.sink.send_frame(frame).await {
                    warn!(backend = %self.backend, error = %e, "Failed to answer backend request");
                }
            }
            Err(e) => warn!(backend = %self.backend, error = %e, "Failed to serialize reply"),
        }
    }

    /// Transport reached end-of-stream: fail outstanding calls and wake
    /// everyone waiting on [`RpcPeer::closed`].
    pub fn mark_closed(&self) {
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.pending)
        };

        if !pending.is_empty() {
            debug!(backend = %self.backend, outstanding = pending.len(), "Transport closed with calls in flight");
        }
        // dropping the senders resolves every waiting request
        drop(pending);
        self.closed_tx.send_replace(true);
    }

    /// Resolves once the transport has closed
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Mark closed and release the transport
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.mark_closed();
        self.sink.shutdown().await
    }
}
