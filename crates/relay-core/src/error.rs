//! Common error types for the gateway

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur anywhere between a front session and a backend
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Backend transport could not be constructed (backend is skipped, no retry)
    #[error("Failed to create transport for '{backend}': {reason}")]
    TransportCreation { backend: String, reason: String },

    /// A connect attempt failed (retried per policy)
    #[error("Failed to connect to '{backend}': {reason}")]
    Connection { backend: String, reason: String },

    /// Inbound credential check failed
    #[error("Unauthorized")]
    AuthRejected,

    /// Invocation references a capability absent from the catalog
    #[error("Capability not found: {0}")]
    NotFound(String),

    /// The owning backend is no longer connected
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend itself returned an application-level error
    #[error("Backend '{backend}' returned error {code}: {message}")]
    BackendReported {
        /// Name of the backend that owns the capability
        backend: String,
        /// JSON-RPC error code as reported by the backend
        code: i64,
        /// Error message as reported by the backend
        message: String,
        /// Optional structured error data
        data: Option<serde_json::Value>,
    },

    /// Transport/communication error on an established session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer sent something that does not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or unsupported request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration (detected at load time)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON-RPC code used for invocations whose owning backend went away
pub const BACKEND_UNAVAILABLE_CODE: i64 = -32001;

/// JSON-RPC code used when a request is rejected by the auth gate
const AUTH_REJECTED_CODE: i64 = -32003;

impl GatewayError {
    /// Attach the owning backend's name to a backend-reported error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_owner(self, owner: &str) -> Self {
        match self {
            GatewayError::BackendReported {
                code,
                message,
                data,
                ..
            } => GatewayError::BackendReported {
                backend: owner.to_string(),
                code,
                message,
                data,
            },
            other => other,
        }
    }

    /// Returns the JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            GatewayError::NotFound(_) => -32602,
            GatewayError::InvalidRequest(_) => -32600,
            GatewayError::BackendReported { code, .. } => *code,
            GatewayError::BackendUnavailable(_)
            | GatewayError::Transport(_)
            | GatewayError::TransportCreation { .. }
            | GatewayError::Connection { .. } => BACKEND_UNAVAILABLE_CODE,
            GatewayError::AuthRejected => AUTH_REJECTED_CODE,
            GatewayError::Protocol(_) | GatewayError::Config(_) | GatewayError::Internal(_) => {
                -32603
            }
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::AuthRejected => 401,
            GatewayError::NotFound(_) => 404,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::BackendReported { .. } => 502,
            GatewayError::Protocol(_) => 502,
            GatewayError::BackendUnavailable(_) => 503,
            GatewayError::Transport(_) => 503,
            GatewayError::TransportCreation { .. } => 503,
            GatewayError::Connection { .. } => 503,
            GatewayError::Config(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_owner_rewrites_backend_reported() {
        let err = GatewayError::BackendReported {
            backend: String::new(),
            code: -32000,
            message: "boom".to_string(),
            data: None,
        }
        .with_owner("files");

        match err {
            GatewayError::BackendReported {
                backend, message, ..
            } => {
                assert_eq!(backend, "files");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn with_owner_leaves_other_variants() {
        let err = GatewayError::NotFound("x".to_string()).with_owner("files");
        assert!(matches!(err, GatewayError::NotFound(ref n) if n == "x"));
    }

    #[test]
    fn auth_rejected_message_carries_no_detail() {
        assert_eq!(GatewayError::AuthRejected.to_string(), "Unauthorized");
        assert_eq!(GatewayError::AuthRejected.status_code(), 401);
    }

    #[test]
    fn backend_reported_keeps_backend_code() {
        let err = GatewayError::BackendReported {
            backend: "a".to_string(),
            code: -32042,
            message: "nope".to_string(),
            data: None,
        };
        assert_eq!(err.rpc_code(), -32042);
        assert_eq!(
            GatewayError::BackendUnavailable("a".into()).rpc_code(),
            BACKEND_UNAVAILABLE_CODE
        );
    }

    #[test]
    fn auth_and_connection_codes() {
        assert_eq!(GatewayError::AuthRejected.rpc_code(), -32003);
        assert_eq!(
            GatewayError::Connection {
                backend: "a".into(),
                reason: "refused".into()
            }
            .rpc_code(),
            BACKEND_UNAVAILABLE_CODE
        );
    }
}
