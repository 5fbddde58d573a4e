//! # Error Types
//!
//! This module defines error types used throughout the thermolink library.
//!
//! Lookup and validation errors never touch registry state; transport
//! errors raised while connecting discard the half-created session.

use thiserror::Error;

/// Main error type for thermolink operations
#[derive(Debug, Error)]
pub enum ThermolinkError {
    /// No session matches the given reference
    #[error("Unknown printer connection. Provide a valid connectionId.")]
    UnknownSession,

    /// No session id was given and more than one session is registered
    #[error("Multiple printer connections are registered. Provide a connectionId.")]
    AmbiguousSession,

    /// The session exists but is not in the active state
    #[error("Printer is not connected!")]
    NotConnected,

    /// A connection attempt to the same address is still outstanding
    #[error("Printer already connecting!")]
    AlreadyConnecting,

    /// The transport could not allocate a handle for the device
    #[error("Failed to create printer interface: {0}")]
    InterfaceCreationFailed(String),

    /// Caller supplied a value outside an enumerated set
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The encoder cannot represent the payload
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Open/close/write rejected by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Device discovery failure
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Adapter access was not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ThermolinkError>;
