//! # Printer Transport Layer
//!
//! Connection-oriented links to printers. A transport hands out an opaque
//! [`TransportHandle`] per device; connection outcomes are reported on one
//! shared event channel as `(handle, StateEvent)` pairs, in the order the
//! transport observed them.
//!
//! ## Available Transports
//!
//! - [`rfcomm`]: Bluetooth RFCOMM TTYs (Linux)
//! - [`mock`]: In-memory transport for tests and dry runs
//!
//! ## Call Model
//!
//! `open`, `close` and `write` only *start* work and return as soon as the
//! request is accepted. Whether a connection came up, or a write killed it,
//! arrives later on the event channel. `write_probe` is the exception: it is
//! a synchronous zero-length write used for liveness checks.

pub mod mock;
pub mod rfcomm;

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

pub use mock::MockTransport;
pub use rfcomm::RfcommTransport;

/// Opaque reference to one physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Link state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    NotConnected,
    Connecting,
}

/// Asynchronous connection outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// The link is up
    Success,
    /// The link failed to come up, or went down
    Interrupted,
}

/// Sending half of the shared event channel.
pub type EventSender = mpsc::UnboundedSender<(TransportHandle, StateEvent)>;

/// Receiving half of the shared event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<(TransportHandle, StateEvent)>;

/// Create the channel a transport reports state changes on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A connection-oriented printer link provider.
pub trait Transport: Send + Sync {
    /// Allocate a handle for `address` without connecting.
    ///
    /// Fails with `InterfaceCreationFailed` when the address cannot be used.
    fn create_handle(&self, address: &str) -> Result<TransportHandle>;

    /// Start connecting. The outcome arrives as a [`StateEvent`].
    fn open(&self, handle: TransportHandle) -> Result<()>;

    /// Start closing. An open link reports `Interrupted` once it is down.
    fn close(&self, handle: TransportHandle) -> Result<()>;

    /// Queue bytes for transmission. Writes on one handle go out in order.
    fn write(&self, handle: TransportHandle, bytes: Vec<u8>) -> Result<()>;

    /// Zero-length write, used to detect silently dropped links.
    fn write_probe(&self, handle: TransportHandle) -> Result<()>;

    fn state(&self, handle: TransportHandle) -> LinkState;

    /// Device name as reported by the link, if known.
    fn device_name(&self, handle: TransportHandle) -> Option<String>;

    /// Forget a handle whose session has been torn down.
    fn release(&self, handle: TransportHandle);
}
