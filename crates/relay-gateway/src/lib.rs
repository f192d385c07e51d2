//! relay-gateway - Backend lifecycle and capability aggregation
//!
//! Turns N independent backend sessions into one catalog:
//!
//! ```text
//!  descriptors ──▶ ConnectionManager ──▶ BackendSession (a) ─┐
//!                  (sequential, retry)   BackendSession (b) ─┼──▶ CapabilityRouter
//!                                        BackendSession (c) ─┘    (catalog + dispatch)
//! ```
//!
//! [`Gateway`] owns both halves, watches sessions for transport loss and
//! tears everything down in order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use relay_backend::DefaultConnector;
//! use relay_gateway::Gateway;
//!
//! let gateway = Gateway::new(Arc::new(DefaultConnector::new()));
//! gateway.start(&config.servers).await;
//!
//! let tools = gateway.router().list_capabilities(CapabilityKind::Tool);
//! let result = gateway.router().invoke("read_file", CapabilityKind::Tool, args).await?;
//!
//! gateway.shutdown().await;
//! ```

pub mod connection;
mod gateway;
pub mod mock;
pub mod router;
mod session;

pub use connection::{ConnectAttempts, ConnectionManager, RetryPolicy};
pub use gateway::Gateway;
pub use router::{CapabilityRouter, Collision, Registration};
pub use session::BackendSession;

// Re-export core types for convenience
pub use relay_core::{CapabilityEntry, CapabilityKind, GatewayError, GatewayResult, SessionState};
