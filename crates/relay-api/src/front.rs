//! Caller-facing sessions
//!
//! A [`FrontSession`] speaks the server side of the protocol to one caller
//! and forwards everything to the shared [`CapabilityRouter`]. It owns no
//! backend state, so any number of them can share one router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_core::rpc::{error_codes, PROTOCOL_VERSION};
use relay_core::{
    CapabilityKind, GatewayError, GatewayResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse,
};
use relay_gateway::CapabilityRouter;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

/// Name reported in `initialize`
pub const SERVER_NAME: &str = "mcp-proxy";

/// How the session is bound to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontMode {
    /// The one caller bound to the process lifetime
    Stdio,
    /// One of many concurrent stream callers
    Stream,
}

/// What the process should do after a session closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Tear down the gateway and exit
    Shutdown,
    /// Keep serving
    KeepRunning,
}

pub struct FrontSession {
    id: String,
    mode: FrontMode,
    router: Arc<CapabilityRouter>,
    keep_open: bool,
    closed: AtomicBool,
}

impl FrontSession {
    pub fn new(id: impl Into<String>, mode: FrontMode, router: Arc<CapabilityRouter>) -> Self {
        Self {
            id: id.into(),
            mode,
            router,
            keep_open: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Keep the process alive after a stdio session closes
    pub fn with_keep_open(mut self, keep_open: bool) -> Self {
        self.keep_open = keep_open;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> FrontMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handle one raw frame and return the serialized reply, if any.
    ///
    /// Undecodable frames get a parse-error reply with a null id.
    pub async fn handle_frame(&self, frame: &str) -> Option<String> {
        let frame = frame.trim();
        if frame.is_empty() {
            return None;
        }

        match JsonRpcMessage::parse(frame) {
            Ok(JsonRpcMessage::Request(request)) => {
                let response = self.handle(request).await?;
                match serde_json::to_string(&response) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        self.on_error(&GatewayError::Internal(e.to_string()));
                        None
                    }
                }
            }
            Ok(JsonRpcMessage::Response(response)) => {
                // we never send requests to the caller
                trace!(session = %self.id, id = %response.id, "Ignoring response from caller");
                None
            }
            Err(e) => {
                self.on_error(&e);
                Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": {"code": error_codes::PARSE_ERROR, "message": e.to_string()},
                    })
                    .to_string(),
                )
            }
        }
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            trace!(session = %self.id, method = %request.method, "Notification");
            return None;
        };

        let response = match self.dispatch(&request.method, request.params).await {
            Some(Ok(value)) => JsonRpcResponse::success(id, value),
            Some(Err(e)) => {
                debug!(session = %self.id, method = %request.method, error = %e, "Request failed");
                JsonRpcResponse::failure(id, JsonRpcError::from(&e))
            }
            None => {
                debug!(session = %self.id, method = %request.method, "Unknown method");
                JsonRpcResponse::failure(
                    id,
                    JsonRpcError {
                        code: error_codes::METHOD_NOT_FOUND,
                        message: format!("Method not found: {}", request.method),
                        data: None,
                    },
                )
            }
        };
        Some(response)
    }

    /// `None` when the method is not served here
    async fn dispatch(&self, method: &str, params: Option<Value>) -> Option<GatewayResult<Value>> {
        let params = params.unwrap_or(Value::Null);

        let result = match method {
            "initialize" => Ok(self.initialize_result(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.listing(CapabilityKind::Tool)),
            "resources/list" => Ok(self.listing(CapabilityKind::Resource)),
            "prompts/list" => Ok(self.listing(CapabilityKind::Prompt)),
            "tools/call" => match required_str(&params, "name") {
                Ok(name) => {
                    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                    self.router.invoke(name, CapabilityKind::Tool, args).await
                }
                Err(e) => Err(e),
            },
            "resources/read" => match required_str(&params, "uri") {
                Ok(uri) => {
                    self.router
                        .invoke(uri, CapabilityKind::Resource, Value::Null)
                        .await
                }
                Err(e) => Err(e),
            },
            "prompts/get" => match required_str(&params, "name") {
                Ok(name) => {
                    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                    self.router.invoke(name, CapabilityKind::Prompt, args).await
                }
                Err(e) => Err(e),
            },
            _ => return None,
        };
        Some(result)
    }

    fn initialize_result(&self, params: &Value) -> Value {
        let client = params
            .get("clientInfo")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(session = %self.id, client = %client, "Front session initialized");

        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {},
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    fn listing(&self, kind: CapabilityKind) -> Value {
        let items: Vec<Value> = self
            .router
            .list_capabilities(kind)
            .iter()
            .map(|entry| entry.exposed_descriptor())
            .collect();
        json!({ kind.collection_key(): items })
    }

    /// Log a session-level failure. Other sessions are unaffected.
    pub fn on_error(&self, error: &GatewayError) {
        warn!(session = %self.id, error = %error, "Front session error");
    }

    /// Mark the session closed and say what the process should do next.
    ///
    /// Only the first call reports `Shutdown`; later calls are no-ops.
    pub fn on_close(&self) -> CloseAction {
        if self.closed.swap(true, Ordering::SeqCst) {
            return CloseAction::KeepRunning;
        }

        let action = match self.mode {
            FrontMode::Stdio if !self.keep_open => CloseAction::Shutdown,
            FrontMode::Stdio | FrontMode::Stream => CloseAction::KeepRunning,
        };
        info!(session = %self.id, mode = ?self.mode, action = ?action, "Front session closed");
        action
    }
}

fn required_str<'a>(params: &'a Value, field: &str) -> GatewayResult<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidRequest(format!("missing string parameter '{}'", field)))
}
