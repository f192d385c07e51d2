//! relay-backend - Backend transports for the relay gateway
//!
//! Provides the concrete [`BackendConnector`](relay_core::BackendConnector)
//! used in production:
//! - `process` backends: a spawned child speaking line-delimited JSON-RPC on
//!   its stdin/stdout
//! - `stream` backends: a remote server-sent-events endpoint that announces a
//!   POST endpoint for outbound messages
//!
//! Both share one request/response correlator ([`peer::RpcPeer`]) and one
//! client implementation ([`client::McpBackendClient`]) that performs the
//! handshake, paginated listings and invocations.
//!
//! # Example
//!
//! ```ignore
//! use relay_backend::DefaultConnector;
//! use relay_core::BackendConnector;
//!
//! let pending = DefaultConnector::new().prepare(&descriptor)?;
//! let client = pending.connect().await?;
//! let tools = client.list(CapabilityKind::Tool).await?;
//! ```

pub mod client;
mod connector;
pub mod peer;
pub mod process;
pub mod sse;
pub mod stream;

pub use client::McpBackendClient;
pub use connector::DefaultConnector;
pub use sse::{SseEvent, SseParser};
