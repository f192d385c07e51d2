//! Default connector: picks the transport from the descriptor

use std::time::Duration;

use relay_core::{
    BackendConnector, BackendDescriptor, GatewayResult, PendingConnection, TransportConfig,
};

use crate::client::DEFAULT_INIT_TIMEOUT;
use crate::process::ProcessConnection;
use crate::stream::StreamConnection;

/// Builds process and stream transports
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    init_timeout: Duration,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    /// Override how long a backend gets to complete the handshake
    pub fn with_init_timeout(mut self, init_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self
    }
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendConnector for DefaultConnector {
    fn prepare(&self, descriptor: &BackendDescriptor) -> GatewayResult<Box<dyn PendingConnection>> {
        Ok(match &descriptor.transport {
            TransportConfig::Process(config) => Box::new(
                ProcessConnection::new(descriptor, config).with_init_timeout(self.init_timeout),
            ),
            TransportConfig::Stream(config) => Box::new(
                StreamConnection::new(descriptor, config)?.with_init_timeout(self.init_timeout),
            ),
        })
    }
}
