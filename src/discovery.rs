//! # Device Discovery
//!
//! A [`DeviceScanner`] runs one inquiry and reports every device it hears.
//! [`DiscoveryRelay`] owns the single scan slot, keeps only imaging-class
//! devices (printers), deduplicates them by address and republishes the
//! cumulative list as [`PrinterEvent::DiscoverDevices`]. When the scanner
//! finishes, or the scan is stopped, it emits [`PrinterEvent::DiscoveryFinish`]
//! and frees the slot.
//!
//! ## Class of Device
//!
//! ```text
//! bits 23..13  service classes
//! bits 12..8   major device class   (0x06 = imaging)
//! bits  7..2   minor device class
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Result, ThermolinkError};
use crate::events::{EventHub, PrinterEvent};

/// Major device class of printers, scanners and cameras.
pub const MAJOR_CLASS_IMAGING: u32 = 0x06;

/// A printer seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
}

/// One raw inquiry result, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub address: String,
    pub name: Option<String>,
    /// Class of Device, when the remote advertised one.
    pub class: Option<u32>,
}

impl ScanReport {
    pub fn major_class(&self) -> Option<u32> {
        self.class.map(|cod| (cod >> 8) & 0x1F)
    }

    pub fn is_imaging(&self) -> bool {
        self.major_class() == Some(MAJOR_CLASS_IMAGING)
    }
}

/// Source of inquiry results.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Run a single scan, sending reports as they arrive. Returning ends the
    /// scan; dropping the future cancels it.
    async fn scan(&self, found: mpsc::Sender<ScanReport>) -> Result<()>;
}

struct ActiveScan {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveScan>,
    generation: u64,
}

/// Single-slot scan coordinator publishing to an [`EventHub`].
pub struct DiscoveryRelay {
    scanner: Arc<dyn DeviceScanner>,
    events: EventHub,
    slot: Arc<Mutex<Slot>>,
}

impl DiscoveryRelay {
    pub fn new(scanner: Arc<dyn DeviceScanner>, events: EventHub) -> Self {
        Self {
            scanner,
            events,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub async fn is_scanning(&self) -> bool {
        self.slot.lock().await.active.is_some()
    }

    /// Start a scan in the background.
    ///
    /// Fails with [`ThermolinkError::Discovery`] while another scan holds the
    /// slot.
    pub async fn start_scan(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.active.is_some() {
            return Err(ThermolinkError::Discovery("already scanning".to_string()));
        }

        slot.generation += 1;
        let generation = slot.generation;
        let (cancel, cancelled) = oneshot::channel();
        slot.active = Some(ActiveScan { generation, cancel });
        drop(slot);

        info!(generation, "scan started");
        tokio::spawn(run_scan(
            self.scanner.clone(),
            self.events.clone(),
            self.slot.clone(),
            generation,
            cancelled,
        ));
        Ok(())
    }

    /// Cancel the running scan. Returns `false` when nothing was running.
    pub async fn stop_scan(&self) -> bool {
        let Some(active) = self.slot.lock().await.active.take() else {
            return false;
        };
        info!(generation = active.generation, "scan stop requested");
        // The task may have finished on its own in the meantime.
        let _ = active.cancel.send(());
        true
    }
}

async fn run_scan(
    scanner: Arc<dyn DeviceScanner>,
    events: EventHub,
    slot: Arc<Mutex<Slot>>,
    generation: u64,
    mut cancelled: oneshot::Receiver<()>,
) {
    let (tx, mut rx) = mpsc::channel(32);
    let mut devices: Vec<DiscoveredDevice> = Vec::new();

    let scan = scanner.scan(tx);
    tokio::pin!(scan);
    let mut scan_done = false;

    loop {
        tokio::select! {
            _ = &mut cancelled => {
                debug!(generation, "scan cancelled");
                break;
            }
            result = &mut scan, if !scan_done => {
                scan_done = true;
                if let Err(err) = result {
                    warn!(generation, error = %err, "scanner failed");
                }
            }
            report = rx.recv() => match report {
                Some(report) => {
                    if merge(&mut devices, &report) {
                        events.emit(PrinterEvent::DiscoverDevices { devices: devices.clone() });
                    }
                }
                // Sender dropped: scanner returned and everything is drained.
                None => break,
            },
        }
    }

    {
        let mut slot = slot.lock().await;
        if slot.active.as_ref().is_some_and(|a| a.generation == generation) {
            slot.active = None;
        }
    }
    info!(generation, found = devices.len(), "scan finished");
    events.emit(PrinterEvent::DiscoveryFinish);
}

/// Fold one report into the list. Returns `true` when the list changed.
fn merge(devices: &mut Vec<DiscoveredDevice>, report: &ScanReport) -> bool {
    if !report.is_imaging() {
        return false;
    }
    let name = report.name.clone().unwrap_or_default();

    match devices.iter_mut().find(|d| d.address == report.address) {
        Some(existing) if existing.name == name || name.is_empty() => false,
        Some(existing) => {
            existing.name = name;
            true
        }
        None => {
            debug!(address = %report.address, name = %name, "printer found");
            devices.push(DiscoveredDevice {
                address: report.address.clone(),
                name,
            });
            true
        }
    }
}

/// Scanner that never finds anything, for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleScanner;

#[async_trait]
impl DeviceScanner for IdleScanner {
    async fn scan(&self, _found: mpsc::Sender<ScanReport>) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// bluetoothctl scanner
// ============================================================================

/// Scanner that drives BlueZ through `bluetoothctl`.
///
/// Runs `bluetoothctl --timeout N scan on`, and for every `[NEW] Device`
/// line asks `bluetoothctl info` for the name and class.
pub struct BluetoothctlScanner {
    timeout: Duration,
}

impl BluetoothctlScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DeviceScanner for BluetoothctlScanner {
    async fn scan(&self, found: mpsc::Sender<ScanReport>) -> Result<()> {
        let mut child = Command::new("bluetoothctl")
            .arg("--timeout")
            .arg(self.timeout.as_secs().max(1).to_string())
            .args(["scan", "on"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ThermolinkError::Discovery(format!("bluetoothctl: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ThermolinkError::Discovery("bluetoothctl has no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            let Some(address) = parse_new_device(&line) else {
                continue;
            };
            let report = device_info(&address).await;
            if found.send(report).await.is_err() {
                break;
            }
        }

        child.wait().await?;
        Ok(())
    }
}

async fn device_info(address: &str) -> ScanReport {
    let output = Command::new("bluetoothctl")
        .args(["info", address])
        .output()
        .await;

    let (name, class) = match output {
        Ok(out) => parse_info(&String::from_utf8_lossy(&out.stdout)),
        Err(err) => {
            debug!(%address, error = %err, "bluetoothctl info failed");
            (None, None)
        }
    };
    ScanReport {
        address: address.to_string(),
        name,
        class,
    }
}

/// Drop ANSI colour sequences that bluetoothctl adds even on pipes.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `[NEW] Device AA:BB:CC:DD:EE:FF Some Name` → `AA:BB:CC:DD:EE:FF`
fn parse_new_device(line: &str) -> Option<String> {
    let line = strip_ansi(line);
    let rest = line.split("[NEW] Device ").nth(1)?;
    let address = rest.split_whitespace().next()?;
    crate::transport::rfcomm::is_valid_mac(address).then(|| address.to_uppercase())
}

/// Pull `Name:` and `Class:` out of `bluetoothctl info` output.
pub(crate) fn parse_info(text: &str) -> (Option<String>, Option<u32>) {
    let mut name = None;
    let mut class = None;
    for line in text.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Class:") {
            let value = value.trim().trim_start_matches("0x");
            class = u32::from_str_radix(value, 16).ok();
        }
    }
    (name, class)
}
