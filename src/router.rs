//! # Transport Event Router
//!
//! Consumes the shared `(handle, StateEvent)` channel and drives session
//! lifecycles:
//!
//! | Event | Session | Effect |
//! |-------|---------|--------|
//! | `Success` | pending | promote, answer the waiting connect, emit `connected` |
//! | `Success` | unknown / not pending | ignored |
//! | `Interrupted` | pending | remove, answer the waiting connect with `None` |
//! | `Interrupted` | active | remove, emit `disconnected` |
//! | `Interrupted` | unknown | ignored |
//!
//! Events are handled one at a time in channel order, so two events for the
//! same session never interleave.

use std::sync::Arc;

use tracing::{debug, info};

use crate::events::PrinterEvent;
use crate::registry::ConnectionRegistry;
use crate::transport::{EventReceiver, StateEvent, TransportHandle};

pub struct TransportEventRouter {
    registry: Arc<ConnectionRegistry>,
    events: EventReceiver,
}

impl TransportEventRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, events: EventReceiver) -> Self {
        Self { registry, events }
    }

    /// Route events until the channel closes or the registry shuts down.
    pub async fn run(mut self) {
        let mut shutdown = self.registry.shutdown_signal();
        if *shutdown.borrow_and_update() {
            return;
        }
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some((handle, event)) => self.dispatch(handle, event).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("event router stopped");
    }

    /// Spawn [`TransportEventRouter::run`] on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Handle one event.
    pub async fn dispatch(&self, handle: TransportHandle, event: StateEvent) {
        match event {
            StateEvent::Success => self.on_success(handle).await,
            StateEvent::Interrupted => self.on_interrupted(handle).await,
        }
    }

    async fn on_success(&self, handle: TransportHandle) {
        let Some(promoted) = self.registry.promote(handle).await else {
            debug!(%handle, "success for unknown or settled link ignored");
            return;
        };

        let identity = promoted.identity;
        info!(id = %identity.connection_id, address = %identity.address, "connected");

        if let Some(reply) = promoted.reply
            && reply.send(Some(identity.clone())).is_err()
        {
            debug!(id = %identity.connection_id, "connect caller went away");
        }
        self.registry.events().emit(PrinterEvent::Connected(identity));
    }

    async fn on_interrupted(&self, handle: TransportHandle) {
        let Some(removed) = self.registry.remove_by_handle(handle).await else {
            debug!(%handle, "interrupt for unknown link ignored");
            return;
        };

        let identity = removed.identity;
        if let Some(reply) = removed.reply {
            info!(id = %identity.connection_id, "connect interrupted");
            let _ = reply.send(None);
        } else if removed.was_active {
            info!(id = %identity.connection_id, address = %identity.address, "disconnected");
            self.registry.events().emit(PrinterEvent::Disconnected(identity));
        }
    }
}
