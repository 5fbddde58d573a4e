//! # Thermolink - ESC/POS Printer Connection Library
//!
//! Thermolink keeps a registry of Bluetooth thermal-printer connections and,
//! per connection, a command buffer that accumulates ESC/POS bytes until the
//! job is written. It provides:
//!
//! - **Connection registry**: connect, resolve, list and tear down sessions
//!   driven by transport state events
//! - **Command buffer**: text, images, barcodes, QR codes and raw bytes with
//!   persistent formatting state
//! - **Protocol implementation**: ESC/POS command builders
//! - **Transport**: Linux RFCOMM, plus an in-memory mock
//! - **Discovery**: scan for imaging-class Bluetooth devices
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use thermolink::{
//!     ConnectionRegistry, EventHub, TransportEventRouter,
//!     config::RfcommConfig,
//!     protocol::EscPosEncoder,
//!     session::Operation,
//!     transport::{RfcommTransport, event_channel},
//! };
//!
//! # async fn demo() -> thermolink::Result<()> {
//! let (tx, rx) = event_channel();
//! let transport = Arc::new(RfcommTransport::new(RfcommConfig::default(), tx));
//! let registry = Arc::new(ConnectionRegistry::new(
//!     transport,
//!     Arc::new(EscPosEncoder),
//!     EventHub::new(),
//! ));
//! TransportEventRouter::new(registry.clone(), rx).spawn();
//!
//! let printer = registry
//!     .connect("66:22:B3:4C:1D:0E", Some("GBK"))
//!     .await?
//!     .ok_or(thermolink::ThermolinkError::NotConnected)?;
//! let id = Some(printer.connection_id);
//!
//! registry.begin(id).await?;
//! registry
//!     .apply(id, &Operation::Text { text: Some("Hello\n".into()) })
//!     .await?;
//! registry.write(id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | Session registry and liveness probe |
//! | [`router`] | Applies transport events to the registry |
//! | [`session`] | Per-connection state and operations |
//! | [`format`] | Persistent formatting state |
//! | [`buffer`] | Command buffer and job envelope |
//! | [`protocol`] | ESC/POS command builders |
//! | [`transport`] | Link back-ends |
//! | [`discovery`] | Device scanning |
//! | [`gate`] | Adapter access checks |
//! | [`events`] | Connection and discovery notifications |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types |

pub mod buffer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod format;
pub mod gate;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use error::{Result, ThermolinkError};
pub use events::{EventHub, PrinterEvent};
pub use registry::ConnectionRegistry;
pub use router::TransportEventRouter;
pub use session::{Operation, PrinterConnection, SessionId};
