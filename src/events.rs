//! # Printer Events
//!
//! Lifecycle and discovery notifications, fanned out to every subscriber
//! over a `tokio::sync::broadcast` channel. The channel is created by
//! whoever builds the registry and passed in explicitly; there is no global
//! listener list.
//!
//! Serialized as `{"event": "...", ...payload}`:
//!
//! | Event | Payload |
//! |-------|---------|
//! | `connected` | `connectionId`, `address`, `name` |
//! | `disconnected` | `connectionId`, `address`, `name` |
//! | `discoverDevices` | `devices: [{address, name}]` |
//! | `discoveryFinish` | none |

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::discovery::DiscoveredDevice;
use crate::session::PrinterConnection;

/// Slow subscribers lag (and skip) past this many queued events.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PrinterEvent {
    Connected(PrinterConnection),
    Disconnected(PrinterConnection),
    DiscoverDevices { devices: Vec<DiscoveredDevice> },
    DiscoveryFinish,
}

impl PrinterEvent {
    /// Value of the `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::DiscoverDevices { .. } => "discoverDevices",
            Self::DiscoveryFinish => "discoveryFinish",
        }
    }
}

/// Cloneable publishing side of the event stream.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<PrinterEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: PrinterEvent) {
        if self.tx.send(event).is_err() {
            trace!("no event subscribers");
        }
    }
}
