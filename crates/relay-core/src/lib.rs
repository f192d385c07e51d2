//! relay-core - Core traits and types for the relay gateway
//!
//! This crate provides the abstractions shared by every layer of the gateway:
//! backend descriptors, the capability model, the error taxonomy, the JSON-RPC
//! message types, and the traits that let different backend transports
//! (spawned processes, remote streams, test mocks) plug into the connection
//! manager and the capability router.

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod models;
pub mod routing;
pub mod rpc;

pub use backend::{BackendClient, BackendConnector, PendingConnection, Timer, TokioTimer};
pub use descriptor::{
    BackendDescriptor, ProcessConfig, Secret, ServersConfig, StreamConfig, StreamHeaders,
    TransportConfig,
};
pub use error::{GatewayError, GatewayResult};
pub use models::{CapabilityEntry, CapabilityKind, SessionState};
pub use rpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};
