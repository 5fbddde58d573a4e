//! # Bluetooth RFCOMM Transport
//!
//! Talks to ESC/POS printers over the Serial Port Profile through the Linux
//! RFCOMM TTY layer.
//!
//! ## Link Setup
//!
//! `open` runs on the blocking pool:
//!
//! 1. Reuse a `/dev/rfcommN` already bound to the MAC (`/proc/net/rfcomm`,
//!    then `rfcomm -a`), or
//! 2. `bluetoothctl connect`, `l2ping -c 1`, then `rfcomm bind` on the first
//!    free device index.
//! 3. Open the device and switch it to raw mode.
//!
//! `rfcomm bind` needs root (or `CAP_NET_ADMIN`).
//!
//! ## TTY Configuration
//!
//! The device is opened in raw mode so binary data passes untouched:
//!
//! - **No input processing**, including XON/XOFF (0x11 and 0x13 show up in
//!   raster data)
//! - **No output processing**: OPOST off, so LF is never expanded to CR LF
//! - **8-bit characters**, no parity
//! - **Non-canonical**, no echo, no signals
//!
//! ## Writes
//!
//! Each handle has one writer task fed through an unbounded queue, so writes
//! on a handle go out in submission order. Payloads are split into
//! `chunk_size` pieces with a short pause between them. A failed write marks
//! the handle disconnected and reports `Interrupted`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{EventSender, LinkState, StateEvent, Transport, TransportHandle};
use crate::config::RfcommConfig;
use crate::error::{Result, ThermolinkError};

/// Highest `/dev/rfcommN` index probed when looking for a free slot.
const MAX_DEVICE_INDEX: u8 = 31;

/// Settle time after `bluetoothctl connect` and `rfcomm bind`.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

struct Link {
    address: String,
    state: LinkState,
    device: Option<Arc<File>>,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    name: Option<String>,
}

type Links = Arc<Mutex<HashMap<TransportHandle, Link>>>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # RFCOMM Printer Transport
///
/// Must be used from inside a tokio runtime: `open` and `write` hand their
/// work to the blocking pool.
pub struct RfcommTransport {
    config: RfcommConfig,
    events: EventSender,
    next_handle: AtomicU64,
    links: Links,
}

impl RfcommTransport {
    pub fn new(config: RfcommConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            next_handle: AtomicU64::new(1),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn report(events: &EventSender, handle: TransportHandle, event: StateEvent) {
    if events.send((handle, event)).is_err() {
        debug!(%handle, ?event, "event channel closed");
    }
}

/// Mark `handle` down and report it, unless it already was.
fn mark_down(links: &Links, events: &EventSender, handle: TransportHandle) {
    let was_up = match guard(links).get_mut(&handle) {
        Some(link) if link.state != LinkState::NotConnected => {
            link.state = LinkState::NotConnected;
            link.device = None;
            link.writer = None;
            true
        }
        _ => false,
    };
    if was_up {
        report(events, handle, StateEvent::Interrupted);
    }
}

impl Transport for RfcommTransport {
    fn create_handle(&self, address: &str) -> Result<TransportHandle> {
        if !is_valid_mac(address) {
            return Err(ThermolinkError::InterfaceCreationFailed(format!(
                "invalid Bluetooth address {:?}",
                address
            )));
        }

        let handle = TransportHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        guard(&self.links).insert(
            handle,
            Link {
                address: address.to_uppercase(),
                state: LinkState::NotConnected,
                device: None,
                writer: None,
                name: None,
            },
        );
        Ok(handle)
    }

    #[instrument(skip(self))]
    fn open(&self, handle: TransportHandle) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ThermolinkError::Transport("no async runtime".to_string()))?;

        let address = {
            let mut links = guard(&self.links);
            let link = links
                .get_mut(&handle)
                .ok_or_else(|| ThermolinkError::Transport(format!("unknown handle {}", handle)))?;
            if link.state != LinkState::NotConnected {
                return Err(ThermolinkError::Transport(format!("{} already open", handle)));
            }
            link.state = LinkState::Connecting;
            link.address.clone()
        };

        let config = self.config.clone();
        let links = self.links.clone();
        let events = self.events.clone();
        let writer_runtime = runtime.clone();

        runtime.spawn_blocking(move || {
            let opened = open_device(&address, &config);
            let name = device_name(&address);

            let mut table = guard(&links);
            let Some(link) = table.get_mut(&handle) else {
                debug!(%handle, "handle released while opening");
                return;
            };
            if link.state != LinkState::Connecting {
                // Closed while we were binding; dropping the file is enough.
                debug!(%handle, "link closed while opening");
                return;
            }

            match opened {
                Ok(file) => {
                    let device = Arc::new(file);
                    let (tx, rx) = mpsc::unbounded_channel();
                    writer_runtime.spawn(write_loop(
                        handle,
                        device.clone(),
                        rx,
                        config,
                        links.clone(),
                        events.clone(),
                    ));
                    link.state = LinkState::Connected;
                    link.device = Some(device);
                    link.writer = Some(tx);
                    link.name = name;
                    drop(table);
                    info!(%handle, %address, "link up");
                    report(&events, handle, StateEvent::Success);
                }
                Err(err) => {
                    link.state = LinkState::NotConnected;
                    drop(table);
                    warn!(%handle, %address, error = %err, "link setup failed");
                    report(&events, handle, StateEvent::Interrupted);
                }
            }
        });
        Ok(())
    }

    #[instrument(skip(self))]
    fn close(&self, handle: TransportHandle) -> Result<()> {
        if !guard(&self.links).contains_key(&handle) {
            return Err(ThermolinkError::Transport(format!("unknown handle {}", handle)));
        }
        mark_down(&self.links, &self.events, handle);
        Ok(())
    }

    fn write(&self, handle: TransportHandle, bytes: Vec<u8>) -> Result<()> {
        let links = guard(&self.links);
        let writer = links
            .get(&handle)
            .filter(|link| link.state == LinkState::Connected)
            .and_then(|link| link.writer.as_ref())
            .ok_or_else(|| ThermolinkError::Transport("link is not connected".to_string()))?;
        debug!(%handle, len = bytes.len(), "queueing write");
        writer
            .send(bytes)
            .map_err(|_| ThermolinkError::Transport("writer stopped".to_string()))
    }

    fn write_probe(&self, handle: TransportHandle) -> Result<()> {
        let device = guard(&self.links)
            .get(&handle)
            .and_then(|link| link.device.clone())
            .ok_or_else(|| ThermolinkError::Transport("link is not connected".to_string()))?;
        probe(&device)
    }

    fn state(&self, handle: TransportHandle) -> LinkState {
        guard(&self.links)
            .get(&handle)
            .map(|link| link.state)
            .unwrap_or(LinkState::NotConnected)
    }

    fn device_name(&self, handle: TransportHandle) -> Option<String> {
        guard(&self.links).get(&handle)?.name.clone()
    }

    fn release(&self, handle: TransportHandle) {
        if guard(&self.links).remove(&handle).is_some() {
            debug!(%handle, "handle released");
        }
    }
}

/// Drain the handle's queue onto the device, one payload at a time.
async fn write_loop(
    handle: TransportHandle,
    device: Arc<File>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    config: RfcommConfig,
    links: Links,
    events: EventSender,
) {
    while let Some(bytes) = queue.recv().await {
        let device = device.clone();
        let config = config.clone();
        let written = tokio::task::spawn_blocking(move || write_chunked(&device, &bytes, &config))
            .await
            .map_err(|e| ThermolinkError::Transport(e.to_string()))
            .and_then(|result| result);

        if let Err(err) = written {
            warn!(%handle, error = %err, "write failed");
            mark_down(&links, &events, handle);
            return;
        }
    }
    debug!(%handle, "writer stopped");
}

fn write_chunked(mut device: &File, data: &[u8], config: &RfcommConfig) -> Result<()> {
    let chunk_size = config.chunk_size.max(1);
    let delay = config.chunk_delay();
    for (i, chunk) in data.chunks(chunk_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }
        device
            .write_all(chunk)
            .map_err(|e| ThermolinkError::Transport(format!("Write failed: {}", e)))?;
    }
    device
        .flush()
        .map_err(|e| ThermolinkError::Transport(format!("Flush failed: {}", e)))
}

/// Zero-length `write(2)`: fails with EIO/ENOTCONN once the link is gone.
fn probe(device: &File) -> Result<()> {
    let buf = [0u8; 0];
    let result = unsafe { libc::write(device.as_raw_fd(), buf.as_ptr().cast(), 0) };
    if result < 0 {
        return Err(ThermolinkError::Transport(format!(
            "probe failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn open_device(address: &str, config: &RfcommConfig) -> Result<File> {
    let path = match find_rfcomm_for_mac(address)? {
        Some(path) => path,
        None => setup_rfcomm(address, config)?,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| ThermolinkError::Transport(format!("Failed to open {}: {}", path, e)))?;
    configure_tty_raw(file.as_raw_fd())?;
    Ok(file)
}

/// Put a TTY into raw 8N1 mode.
fn configure_tty_raw(fd: i32) -> Result<()> {
    use std::mem::MaybeUninit;

    let mut termios = MaybeUninit::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(ThermolinkError::Transport(format!(
            "tcgetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(ThermolinkError::Transport(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

// ============================================================================
// RFCOMM SETUP HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Device name from a `/proc/net/rfcomm` or `rfcomm -a` line bound to `mac`.
///
/// Lines look like `rfcomm0: 66:22:B3:4C:1D:0E channel 1 clean`.
fn bound_device(listing: &str, mac: &str) -> Option<String> {
    let mac = mac.to_uppercase();
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac))
        .find_map(|line| {
            let name = line.split(':').next()?.trim();
            name.starts_with("rfcomm").then(|| format!("/dev/{}", name))
        })
}

/// Find an existing RFCOMM device bound to `mac`.
pub fn find_rfcomm_for_mac(mac: &str) -> Result<Option<String>> {
    if let Ok(contents) = fs::read_to_string("/proc/net/rfcomm")
        && let Some(path) = bound_device(&contents, mac)
        && Path::new(&path).exists()
    {
        return Ok(Some(path));
    }

    let output = Command::new("rfcomm")
        .arg("-a")
        .output()
        .map_err(|e| ThermolinkError::Transport(format!("Failed to run 'rfcomm -a': {}", e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(bound_device(&stdout, mac).filter(|path| Path::new(path).exists()))
}

fn free_device_index(first: u8) -> Option<u8> {
    (first..=MAX_DEVICE_INDEX).find(|n| !Path::new(&format!("/dev/rfcomm{}", n)).exists())
}

/// Connect, verify with `l2ping`, and bind a fresh `/dev/rfcommN`.
fn setup_rfcomm(mac: &str, config: &RfcommConfig) -> Result<String> {
    let mac = mac.to_uppercase();
    let index = free_device_index(config.first_device)
        .ok_or_else(|| ThermolinkError::Transport("no free rfcomm device".to_string()))?;
    let device_path = format!("/dev/rfcomm{}", index);

    let output = Command::new("bluetoothctl")
        .arg("connect")
        .arg(&mac)
        .output()
        .map_err(|e| ThermolinkError::Transport(format!("Failed to run bluetoothctl: {}", e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !(stdout.contains("Connection successful") || stdout.contains("already connected")) {
        // l2ping below decides whether the device is really there.
        debug!(%mac, output = %stdout.trim(), "bluetoothctl connect");
    }
    thread::sleep(SETTLE_DELAY);

    let output = Command::new("l2ping")
        .args(["-c", "1"])
        .arg(&mac)
        .output()
        .map_err(|e| ThermolinkError::Transport(format!("Failed to run l2ping: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ThermolinkError::Transport(format!(
            "Device {} not reachable: {}",
            mac,
            stderr.trim()
        )));
    }

    info!(%mac, device = %device_path, "binding rfcomm");
    let output = Command::new("rfcomm")
        .arg("bind")
        .arg(index.to_string())
        .arg(&mac)
        .arg(config.channel.to_string())
        .output()
        .map_err(|e| ThermolinkError::Transport(format!("Failed to run rfcomm bind: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ThermolinkError::Transport(format!(
            "rfcomm bind failed: {}",
            stderr.trim()
        )));
    }
    thread::sleep(SETTLE_DELAY);

    if !Path::new(&device_path).exists() {
        return Err(ThermolinkError::Transport(format!(
            "Device {} was not created",
            device_path
        )));
    }
    Ok(device_path)
}

fn device_name(mac: &str) -> Option<String> {
    let output = Command::new("bluetoothctl").args(["info", mac]).output().ok()?;
    crate::discovery::parse_info(&String::from_utf8_lossy(&output.stdout)).0
}
