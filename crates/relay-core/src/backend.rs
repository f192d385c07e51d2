//! Backend traits - the seam between the gateway and concrete transports

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::BackendDescriptor;
use crate::error::GatewayResult;
use crate::models::CapabilityKind;

/// A live, handshaken session with one backend.
///
/// Implementations are transport-specific (spawned process, remote stream,
/// in-memory mock); the gateway only ever talks to this trait.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Backend name (descriptor name)
    fn name(&self) -> &str;

    /// Whether the backend advertised support for the given kind during
    /// the handshake. Kinds that are not advertised are never listed.
    fn advertises(&self, kind: CapabilityKind) -> bool;

    /// Full listing of one kind, as raw descriptor payloads
    async fn list(&self, kind: CapabilityKind) -> GatewayResult<Vec<Value>>;

    /// Invoke one capability by the backend's own name.
    ///
    /// For resources `name` is the URI and `args` is ignored.
    async fn invoke(&self, kind: CapabilityKind, name: &str, args: Value) -> GatewayResult<Value>;

    /// Resolves once the underlying transport has closed
    async fn closed(&self);

    /// Close the session and release its transport
    async fn close(&self) -> GatewayResult<()>;
}

/// A transport that has been constructed but not yet connected
#[async_trait]
pub trait PendingConnection: Send {
    /// Run the connect handshake.
    ///
    /// On failure the implementation releases whatever it had acquired
    /// (child process, HTTP stream) before returning.
    async fn connect(self: Box<Self>) -> GatewayResult<Arc<dyn BackendClient>>;
}

/// Builds transports from descriptors
pub trait BackendConnector: Send + Sync {
    /// Construct a transport for the descriptor.
    ///
    /// Errors here are [`GatewayError::TransportCreation`](crate::GatewayError)
    /// and are not retried.
    fn prepare(&self, descriptor: &BackendDescriptor) -> GatewayResult<Box<dyn PendingConnection>>;
}

/// Scheduler-agnostic pause used between connect attempts
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by the tokio clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokio_timer_sleeps() {
        let start = std::time::Instant::now();
        tokio_test::block_on(TokioTimer.sleep(Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
