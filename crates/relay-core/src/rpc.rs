//! JSON-RPC 2.0 message types shared by the backend and front sides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Protocol version sent in (and accepted from) `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Request identifier (numbers and strings are both legal on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC request, or a notification when `id` is absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response (success or error)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Extract the result, turning an error object into
    /// [`GatewayError::BackendReported`] attributed to `backend`.
    pub fn into_result(self, backend: &str) -> Result<Value, GatewayError> {
        if let Some(err) = self.error {
            return Err(GatewayError::BackendReported {
                backend: backend.to_string(),
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        self.result.ok_or_else(|| {
            GatewayError::Protocol("response missing both result and error".to_string())
        })
    }
}

impl From<&GatewayError> for JsonRpcError {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::BackendReported {
                backend,
                code,
                message,
                data,
            } => {
                // non-object payloads are nested so the owner always survives
                let data = match data.clone() {
                    Some(Value::Object(mut obj)) => {
                        obj.insert("backend".to_string(), Value::String(backend.clone()));
                        Value::Object(obj)
                    }
                    Some(other) => serde_json::json!({ "backend": backend, "data": other }),
                    None => serde_json::json!({ "backend": backend }),
                };
                JsonRpcError {
                    code: *code,
                    message: message.clone(),
                    data: Some(data),
                }
            }
            other => JsonRpcError {
                code: other.rpc_code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

/// Any message that can arrive on a JSON-RPC connection
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value. Objects with a `method` field are
    /// requests/notifications, everything else must be a response.
    pub fn from_value(value: Value) -> Result<Self, GatewayError> {
        let is_request = value.get("method").is_some();
        if is_request {
            serde_json::from_value(value)
                .map(JsonRpcMessage::Request)
                .map_err(|e| GatewayError::Protocol(format!("malformed request: {}", e)))
        } else {
            serde_json::from_value(value)
                .map(JsonRpcMessage::Response)
                .map_err(|e| GatewayError::Protocol(format!("malformed response: {}", e)))
        }
    }

    /// Decode a single frame (one line or one SSE data payload)
    pub fn parse(frame: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| GatewayError::Protocol(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }
}

/// Well-known JSON-RPC error codes
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn notification_has_no_id() {
        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
        assert!(note.id.is_none());
    }

    #[test]
    fn classify_string_id_request() {
        let msg = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        match msg {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.id, Some(RequestId::String("abc".into())));
                assert_eq!(req.method, "ping");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classify_error_response() {
        let msg = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let JsonRpcMessage::Response(resp) = msg else {
            panic!("expected response");
        };
        let err = resp.into_result("files").unwrap_err();
        match err {
            GatewayError::BackendReported {
                backend,
                code,
                message,
                ..
            } => {
                assert_eq!(backend, "files");
                assert_eq!(code, error_codes::METHOD_NOT_FOUND);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn response_without_result_or_error_is_protocol_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: RequestId::Number(1),
            result: None,
            error: None,
        };
        assert!(matches!(
            resp.into_result("a"),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn invalid_json_is_protocol_error() {
        assert!(matches!(
            JsonRpcMessage::parse("not json"),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn backend_reported_error_carries_owner_in_data() {
        let err = GatewayError::BackendReported {
            backend: "git".into(),
            code: -32000,
            message: "dirty tree".into(),
            data: Some(json!({"path": "/repo"})),
        };
        let rpc = JsonRpcError::from(&err);
        assert_eq!(rpc.code, -32000);
        assert_eq!(rpc.message, "dirty tree");
        let data = rpc.data.unwrap();
        assert_eq!(data["backend"], "git");
        assert_eq!(data["path"], "/repo");
    }

    #[test]
    fn backend_reported_scalar_data_is_nested_under_owner() {
        let err = GatewayError::BackendReported {
            backend: "git".into(),
            code: -32000,
            message: "crashed".into(),
            data: Some(json!("stack trace text")),
        };
        let data = JsonRpcError::from(&err).data.unwrap();
        assert_eq!(data, json!({"backend": "git", "data": "stack trace text"}));

        let err = GatewayError::BackendReported {
            backend: "git".into(),
            code: -32000,
            message: "crashed".into(),
            data: None,
        };
        let data = JsonRpcError::from(&err).data.unwrap();
        assert_eq!(data, json!({"backend": "git"}));
    }
}
