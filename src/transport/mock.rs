//! # Mock Transport
//!
//! In-memory [`Transport`] that records writes and lets the caller drive link
//! state by hand: succeed or interrupt a connection, drop a link silently,
//! or break its liveness probe. Used by the test suite and by `--dry-run`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{EventSender, LinkState, StateEvent, Transport, TransportHandle};
use crate::error::{Result, ThermolinkError};

#[derive(Debug)]
struct Link {
    address: String,
    state: LinkState,
    writes: Vec<Vec<u8>>,
    probe_broken: bool,
    close_fails: bool,
    released: bool,
}

#[derive(Debug, Default)]
struct Plan {
    auto_connect: bool,
    rejected: HashSet<String>,
    failing_open: HashSet<String>,
    names: HashMap<String, String>,
}

/// Scriptable in-memory transport.
pub struct MockTransport {
    events: EventSender,
    next_handle: AtomicU64,
    links: Mutex<HashMap<TransportHandle, Link>>,
    plan: Mutex<Plan>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Links stay `Connecting` after `open` until [`MockTransport::succeed`]
    /// or [`MockTransport::interrupt`] is called.
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_handle: AtomicU64::new(1),
            links: Mutex::new(HashMap::new()),
            plan: Mutex::new(Plan::default()),
        }
    }

    /// Report `Success` as soon as a link is opened.
    pub fn with_auto_connect(self) -> Self {
        guard(&self.plan).auto_connect = true;
        self
    }

    /// Make `create_handle` fail for `address`.
    pub fn reject_address(&self, address: &str) {
        guard(&self.plan).rejected.insert(address.to_string());
    }

    /// Make `open` fail synchronously for `address`.
    pub fn fail_open(&self, address: &str) {
        guard(&self.plan).failing_open.insert(address.to_string());
    }

    /// Name reported by the link once connected.
    pub fn set_device_name(&self, address: &str, name: &str) {
        guard(&self.plan)
            .names
            .insert(address.to_string(), name.to_string());
    }

    /// Most recent handle created for `address`.
    pub fn handle_for(&self, address: &str) -> Option<TransportHandle> {
        guard(&self.links)
            .iter()
            .filter(|(_, link)| link.address == address)
            .map(|(handle, _)| *handle)
            .max()
    }

    /// Bring the link up and report `Success`.
    pub fn succeed(&self, handle: TransportHandle) {
        self.set_state(handle, LinkState::Connected);
        self.emit(handle, StateEvent::Success);
    }

    /// Take the link down and report `Interrupted`.
    pub fn interrupt(&self, handle: TransportHandle) {
        self.set_state(handle, LinkState::NotConnected);
        self.emit(handle, StateEvent::Interrupted);
    }

    /// Report an event without touching link state.
    pub fn emit(&self, handle: TransportHandle, event: StateEvent) {
        if self.events.send((handle, event)).is_err() {
            debug!(%handle, ?event, "event channel closed");
        }
    }

    /// Take the link down without telling anyone.
    pub fn drop_silently(&self, handle: TransportHandle) {
        self.set_state(handle, LinkState::NotConnected);
    }

    /// Keep reporting `Connected` but fail the zero-length write.
    pub fn break_probe(&self, handle: TransportHandle) {
        if let Some(link) = guard(&self.links).get_mut(&handle) {
            link.probe_broken = true;
        }
    }

    /// Make `close` return an error for this link.
    pub fn fail_close(&self, handle: TransportHandle) {
        if let Some(link) = guard(&self.links).get_mut(&handle) {
            link.close_fails = true;
        }
    }

    /// Every write accepted on the link, in order.
    pub fn writes(&self, handle: TransportHandle) -> Vec<Vec<u8>> {
        guard(&self.links)
            .get(&handle)
            .map(|link| link.writes.clone())
            .unwrap_or_default()
    }

    pub fn is_released(&self, handle: TransportHandle) -> bool {
        guard(&self.links)
            .get(&handle)
            .is_some_and(|link| link.released)
    }

    fn set_state(&self, handle: TransportHandle, state: LinkState) {
        if let Some(link) = guard(&self.links).get_mut(&handle) {
            link.state = state;
        }
    }
}

impl Transport for MockTransport {
    fn create_handle(&self, address: &str) -> Result<TransportHandle> {
        if guard(&self.plan).rejected.contains(address) {
            return Err(ThermolinkError::InterfaceCreationFailed(format!(
                "no adapter route to {}",
                address
            )));
        }

        let handle = TransportHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        guard(&self.links).insert(
            handle,
            Link {
                address: address.to_string(),
                state: LinkState::NotConnected,
                writes: Vec::new(),
                probe_broken: false,
                close_fails: false,
                released: false,
            },
        );
        Ok(handle)
    }

    fn open(&self, handle: TransportHandle) -> Result<()> {
        let address = guard(&self.links)
            .get(&handle)
            .map(|link| link.address.clone())
            .ok_or_else(|| ThermolinkError::Transport(format!("unknown handle {}", handle)))?;

        let (fails, auto) = {
            let plan = guard(&self.plan);
            (plan.failing_open.contains(&address), plan.auto_connect)
        };
        if fails {
            return Err(ThermolinkError::Transport(format!("cannot open {}", address)));
        }

        self.set_state(handle, LinkState::Connecting);
        if auto {
            self.succeed(handle);
        }
        Ok(())
    }

    fn close(&self, handle: TransportHandle) -> Result<()> {
        let was_up = {
            let mut links = guard(&self.links);
            let link = links
                .get_mut(&handle)
                .ok_or_else(|| ThermolinkError::Transport(format!("unknown handle {}", handle)))?;
            if link.close_fails {
                return Err(ThermolinkError::Transport("close refused".to_string()));
            }
            let was_up = link.state != LinkState::NotConnected;
            link.state = LinkState::NotConnected;
            was_up
        };

        if was_up {
            self.emit(handle, StateEvent::Interrupted);
        }
        Ok(())
    }

    fn write(&self, handle: TransportHandle, bytes: Vec<u8>) -> Result<()> {
        let mut links = guard(&self.links);
        match links.get_mut(&handle) {
            Some(link) if link.state == LinkState::Connected => {
                link.writes.push(bytes);
                Ok(())
            }
            _ => Err(ThermolinkError::Transport("link is not connected".to_string())),
        }
    }

    fn write_probe(&self, handle: TransportHandle) -> Result<()> {
        match guard(&self.links).get(&handle) {
            Some(link) if link.state == LinkState::Connected && !link.probe_broken => Ok(()),
            _ => Err(ThermolinkError::Transport("probe write failed".to_string())),
        }
    }

    fn state(&self, handle: TransportHandle) -> LinkState {
        guard(&self.links)
            .get(&handle)
            .map(|link| link.state)
            .unwrap_or(LinkState::NotConnected)
    }

    fn device_name(&self, handle: TransportHandle) -> Option<String> {
        let address = guard(&self.links).get(&handle)?.address.clone();
        guard(&self.plan).names.get(&address).cloned()
    }

    fn release(&self, handle: TransportHandle) {
        if let Some(link) = guard(&self.links).get_mut(&handle) {
            link.released = true;
        }
    }
}
