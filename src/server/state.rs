//! Server state shared across handlers.

use std::sync::Arc;

use crate::discovery::DiscoveryRelay;
use crate::gate::AccessGate;
use crate::protocol::charset::TextEncoding;
use crate::registry::ConnectionRegistry;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub discovery: Arc<DiscoveryRelay>,
    /// Guards the adapter-bound calls (connect, scan start).
    pub gate: Arc<dyn AccessGate>,
    /// Used when a connect request names no encoding.
    pub default_encoding: TextEncoding,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        discovery: Arc<DiscoveryRelay>,
        gate: Arc<dyn AccessGate>,
    ) -> Self {
        Self {
            registry,
            discovery,
            gate,
            default_encoding: TextEncoding::default(),
        }
    }

    pub fn with_default_encoding(mut self, encoding: TextEncoding) -> Self {
        self.default_encoding = encoding;
        self
    }
}
