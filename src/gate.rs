//! # Adapter Access Gate
//!
//! Connecting and scanning need a usable Bluetooth adapter. Instead of
//! remembering which call was in flight and re-dispatching on its name once
//! access arrives, the caller captures the call as a [`DeferredAction`] and
//! the gate runs that value directly when access is granted.
//!
//! ```no_run
//! # async fn demo(gate: &dyn thermolink::gate::AccessGate) -> thermolink::Result<()> {
//! use thermolink::gate::run_gated;
//!
//! let n = run_gated(gate, "scan", || async { Ok(42) }).await?;
//! # Ok(()) }
//! ```

use std::future::Future;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, ThermolinkError};

/// Decides whether adapter-bound operations may run.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn is_granted(&self) -> bool;

    /// Try to obtain access. Returns whether it was granted.
    async fn request(&self) -> bool;
}

/// Gate for back-ends that need no adapter (the mock transport).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

#[async_trait]
impl AccessGate for AlwaysGranted {
    async fn is_granted(&self) -> bool {
        true
    }

    async fn request(&self) -> bool {
        true
    }
}

/// BlueZ gate: access means the default controller is powered.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluetoothctlGate;

impl BluetoothctlGate {
    async fn bluetoothctl(args: &[&str]) -> Option<String> {
        match Command::new("bluetoothctl").args(args).output().await {
            Ok(out) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Err(err) => {
                warn!(error = %err, "bluetoothctl unavailable");
                None
            }
        }
    }
}

fn is_powered(show: &str) -> bool {
    show.lines()
        .map(str::trim)
        .any(|line| line == "Powered: yes")
}

#[async_trait]
impl AccessGate for BluetoothctlGate {
    async fn is_granted(&self) -> bool {
        Self::bluetoothctl(&["show"])
            .await
            .is_some_and(|out| is_powered(&out))
    }

    async fn request(&self) -> bool {
        info!("powering on Bluetooth adapter");
        if Self::bluetoothctl(&["power", "on"]).await.is_none() {
            return false;
        }
        self.is_granted().await
    }
}

/// An adapter-bound operation captured before access is checked.
pub struct DeferredAction<F> {
    label: &'static str,
    action: F,
}

impl<F, Fut, T> DeferredAction<F>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    pub fn new(label: &'static str, action: F) -> Self {
        Self { label, action }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Run the action if `gate` grants access, requesting it first if needed.
    pub async fn run_gated(self, gate: &dyn AccessGate) -> Result<T> {
        if !gate.is_granted().await {
            debug!(action = self.label, "adapter access not granted, requesting");
            if !gate.request().await {
                return Err(ThermolinkError::PermissionDenied(format!(
                    "Bluetooth access denied for {}",
                    self.label
                )));
            }
        }
        (self.action)().await
    }
}

/// Shorthand for `DeferredAction::new(label, action).run_gated(gate)`.
pub async fn run_gated<F, Fut, T>(gate: &dyn AccessGate, label: &'static str, action: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    DeferredAction::new(label, action).run_gated(gate).await
}
