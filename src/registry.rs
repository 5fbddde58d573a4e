//! # Connection Registry
//!
//! Process-wide table of printer sessions.
//!
//! ## Layout
//!
//! One owning table keyed by [`SessionId`] plus secondary indexes that store
//! ids only:
//!
//! | View | Key | Holds |
//! |------|-----|-------|
//! | `sessions` | session id | identity, handle, state, session |
//! | `by_address` | device address | active sessions |
//! | `pending_by_address` | device address | sessions still connecting |
//! | `by_handle` | transport handle | every session |
//! | `pending_requests` | session id | the caller waiting on a connect |
//!
//! All views live behind one lock and are only changed through
//! `insert_pending`, `promote` and `remove`, so
//! no caller ever sees a session in one view and not another.
//!
//! ## Locking
//!
//! The table lock is never held across an `.await`, and is never taken while
//! a session lock is held. Session locks serialize operations and flushes on
//! the same session; different sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ThermolinkError};
use crate::events::{EventHub, PrinterEvent};
use crate::format::FormattingState;
use crate::protocol::CommandEncoder;
use crate::protocol::charset::TextEncoding;
use crate::session::{LifecycleState, Operation, PrinterConnection, Session, SessionId};
use crate::transport::{LinkState, Transport, TransportHandle};

/// A session's formatting state and buffer, locked per session.
pub type SharedSession = Arc<Mutex<Session>>;

type ConnectReply = oneshot::Sender<Option<PrinterConnection>>;

// ============================================================================
// TABLES
// ============================================================================

struct Entry {
    address: String,
    name: String,
    handle: TransportHandle,
    state: LifecycleState,
    session: SharedSession,
}

impl Entry {
    fn identity(&self, id: SessionId) -> PrinterConnection {
        PrinterConnection {
            connection_id: id,
            address: self.address.clone(),
            name: self.name.clone(),
        }
    }
}

/// Result of tearing a session out of every view.
pub(crate) struct Removed {
    pub identity: PrinterConnection,
    pub handle: TransportHandle,
    pub was_active: bool,
    pub reply: Option<ConnectReply>,
}

/// Result of a `Pending → Active` transition.
pub(crate) struct Promoted {
    pub identity: PrinterConnection,
    pub reply: Option<ConnectReply>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Entry>,
    by_address: HashMap<String, SessionId>,
    pending_by_address: HashMap<String, SessionId>,
    by_handle: HashMap<TransportHandle, SessionId>,
    pending_requests: HashMap<SessionId, ConnectReply>,
}

impl Tables {
    fn insert_pending(&mut self, id: SessionId, entry: Entry, reply: ConnectReply) {
        self.pending_by_address.insert(entry.address.clone(), id);
        self.by_handle.insert(entry.handle, id);
        self.pending_requests.insert(id, reply);
        self.sessions.insert(id, entry);
    }

    fn promote(&mut self, id: SessionId, name: Option<String>) -> Option<Promoted> {
        let entry = self.sessions.get_mut(&id)?;
        if entry.state != LifecycleState::Pending {
            return None;
        }

        entry.state = LifecycleState::Active;
        if let Some(name) = name {
            entry.name = name;
        }
        let identity = entry.identity(id);

        if self.pending_by_address.get(&identity.address) == Some(&id) {
            self.pending_by_address.remove(&identity.address);
        }
        self.by_address.insert(identity.address.clone(), id);

        Some(Promoted {
            identity,
            reply: self.pending_requests.remove(&id),
        })
    }

    /// Drop `id` from every view. Absent ids are a no-op.
    fn remove(&mut self, id: SessionId) -> Option<Removed> {
        let mut entry = self.sessions.remove(&id)?;
        let was_active = entry.state == LifecycleState::Active;
        entry.state = LifecycleState::Closed;

        // Address slots may already belong to a newer session
        if self.by_address.get(&entry.address) == Some(&id) {
            self.by_address.remove(&entry.address);
        }
        if self.pending_by_address.get(&entry.address) == Some(&id) {
            self.pending_by_address.remove(&entry.address);
        }
        self.by_handle.remove(&entry.handle);

        Some(Removed {
            identity: entry.identity(id),
            handle: entry.handle,
            was_active,
            reply: self.pending_requests.remove(&id),
        })
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            active_by_address: self.by_address.len(),
            pending_by_address: self.pending_by_address.len(),
            by_handle: self.by_handle.len(),
            pending_requests: self.pending_requests.len(),
        }
    }
}

/// Sizes of every registry view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub sessions: usize,
    pub active_by_address: usize,
    pub pending_by_address: usize,
    pub by_handle: usize,
    pub pending_requests: usize,
}

// ============================================================================
// CONNECT RESULTS
// ============================================================================

/// Outcome of [`ConnectionRegistry::begin_connect`].
#[derive(Debug)]
pub enum Connecting {
    /// Already connected; nothing to wait for
    Ready(PrinterConnection),
    /// Transport connect started
    Pending(PendingConnect),
}

/// A connect request waiting for the transport's verdict.
#[derive(Debug)]
pub struct PendingConnect {
    session_id: SessionId,
    reply: oneshot::Receiver<Option<PrinterConnection>>,
}

impl PendingConnect {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Wait for the outcome.
    ///
    /// `None` means the session never came up: the link was interrupted, the
    /// session was disconnected, or the registry shut down.
    pub async fn wait(self) -> Option<PrinterConnection> {
        self.reply.await.ok().flatten()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

struct Resolved {
    id: SessionId,
    handle: TransportHandle,
    state: LifecycleState,
    session: SharedSession,
}

/// Authoritative set of printer sessions.
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    encoder: Arc<dyn CommandEncoder>,
    events: EventHub,
    tables: Mutex<Tables>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        encoder: Arc<dyn CommandEncoder>,
        events: EventHub,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            encoder,
            events,
            tables: Mutex::new(Tables::default()),
            shutdown,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn encoder(&self) -> &dyn CommandEncoder {
        self.encoder.as_ref()
    }

    /// Fires once [`ConnectionRegistry::shutdown`] has run.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.tables.lock().await.stats()
    }

    // ------------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------------

    /// Start connecting to `address`.
    ///
    /// An active session for the address is returned as is. A connect still
    /// in flight for the address fails with `AlreadyConnecting`. Otherwise a
    /// pending session is registered and the transport is asked to open; the
    /// outcome arrives through the event router.
    ///
    /// Unknown encodings fall back to GBK.
    #[instrument(skip(self), fields(session_id = tracing::field::Empty))]
    pub async fn begin_connect(&self, address: &str, encoding: Option<&str>) -> Result<Connecting> {
        let encoding = TextEncoding::or_default(encoding);
        let mut tables = self.tables.lock().await;

        if let Some(&id) = tables.by_address.get(address) {
            let handle = tables.sessions.get(&id).map(|entry| entry.handle);
            match handle {
                Some(handle) if self.transport.state(handle) == LinkState::Connected => {
                    if let Some(entry) = tables.sessions.get(&id) {
                        debug!(%id, "already connected");
                        return Ok(Connecting::Ready(entry.identity(id)));
                    }
                }
                _ => {
                    // Link went away without telling us; clear it before reconnecting
                    if let Some(stale) = tables.remove(id) {
                        self.transport.release(stale.handle);
                        warn!(%id, "dropping stale session before reconnect");
                        self.events.emit(PrinterEvent::Disconnected(stale.identity));
                    }
                }
            }
        }

        if tables.pending_by_address.contains_key(address) {
            return Err(ThermolinkError::AlreadyConnecting);
        }

        let handle = self.transport.create_handle(address)?;
        let id = SessionId::new();
        tracing::Span::current().record("session_id", tracing::field::display(id));

        let (reply_tx, reply_rx) = oneshot::channel();
        tables.insert_pending(
            id,
            Entry {
                address: address.to_string(),
                name: self.transport.device_name(handle).unwrap_or_default(),
                handle,
                state: LifecycleState::Pending,
                session: Arc::new(Mutex::new(Session::new(id, encoding))),
            },
            reply_tx,
        );

        if let Err(e) = self.transport.open(handle) {
            tables.remove(id);
            self.transport.release(handle);
            warn!(%id, error = %e, "transport refused to open");
            return Err(e);
        }

        info!(%id, %handle, %encoding, "connecting");
        Ok(Connecting::Pending(PendingConnect {
            session_id: id,
            reply: reply_rx,
        }))
    }

    /// Connect and wait for the outcome.
    ///
    /// `Ok(None)` when the link was interrupted before it came up.
    pub async fn connect(
        &self,
        address: &str,
        encoding: Option<&str>,
    ) -> Result<Option<PrinterConnection>> {
        match self.begin_connect(address, encoding).await? {
            Connecting::Ready(identity) => Ok(Some(identity)),
            Connecting::Pending(pending) => Ok(pending.wait().await),
        }
    }

    /// Ask the transport to close an active session.
    ///
    /// Returns once the close is requested; removal happens when the
    /// transport reports the link down.
    pub async fn disconnect(&self, reference: Option<SessionId>) -> Result<()> {
        let target = self.lookup(reference, false).await?;
        if target.state != LifecycleState::Active {
            return Err(ThermolinkError::NotConnected);
        }

        info!(id = %target.id, handle = %target.handle, "disconnecting");
        self.transport.close(target.handle)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Find a session by id, or the sole registered session.
    pub async fn resolve(
        &self,
        reference: Option<SessionId>,
        require_active: bool,
    ) -> Result<PrinterConnection> {
        let tables = self.tables.lock().await;
        let id = Self::pick(&tables, reference, require_active)?;
        tables
            .sessions
            .get(&id)
            .map(|entry| entry.identity(id))
            .ok_or(ThermolinkError::UnknownSession)
    }

    /// Active sessions that pass the liveness probe.
    ///
    /// Sessions failing the probe are removed from every view and reported
    /// as `disconnected`. Pending sessions are neither listed nor probed.
    pub async fn list_connections(&self) -> Vec<PrinterConnection> {
        let mut tables = self.tables.lock().await;

        let mut alive = Vec::new();
        let mut dead = Vec::new();
        for (&id, entry) in &tables.sessions {
            if entry.state != LifecycleState::Active {
                continue;
            }
            if self.probe(entry.handle) {
                alive.push(entry.identity(id));
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            if let Some(removed) = tables.remove(id) {
                self.transport.release(removed.handle);
                warn!(%id, address = %removed.identity.address, "liveness probe failed");
                self.events.emit(PrinterEvent::Disconnected(removed.identity));
            }
        }

        alive.sort_by(|a, b| a.address.cmp(&b.address));
        alive
    }

    /// Probe one session, or any session when no id is given.
    ///
    /// Unknown ids report `false`. Nothing is removed.
    pub async fn is_connected(&self, reference: Option<SessionId>) -> bool {
        let tables = self.tables.lock().await;
        match reference {
            Some(id) => tables
                .sessions
                .get(&id)
                .is_some_and(|entry| self.probe(entry.handle)),
            None => tables
                .sessions
                .values()
                .any(|entry| self.probe(entry.handle)),
        }
    }

    /// State check, zero-length write, state re-check.
    fn probe(&self, handle: TransportHandle) -> bool {
        if self.transport.state(handle) != LinkState::Connected {
            return false;
        }
        if let Err(e) = self.transport.write_probe(handle) {
            debug!(%handle, error = %e, "probe write failed");
            return false;
        }
        self.transport.state(handle) == LinkState::Connected
    }

    // ------------------------------------------------------------------------
    // Formatting / content
    // ------------------------------------------------------------------------

    /// Apply one operation to an active session.
    pub async fn apply(&self, reference: Option<SessionId>, op: &Operation) -> Result<()> {
        let target = self.lookup(reference, true).await?;
        let mut session = target.session.lock().await;
        session.apply(self.encoder.as_ref(), op).inspect_err(|e| {
            debug!(id = %target.id, op = op.name(), error = %e, "operation failed");
        })
    }

    /// Apply operations in order under one session lock.
    ///
    /// Stops at the first failure; operations before it stay applied.
    pub async fn apply_all(&self, reference: Option<SessionId>, ops: &[Operation]) -> Result<()> {
        let target = self.lookup(reference, true).await?;
        let mut session = target.session.lock().await;
        for (index, op) in ops.iter().enumerate() {
            session.apply(self.encoder.as_ref(), op).inspect_err(|e| {
                debug!(id = %target.id, index, op = op.name(), error = %e, "batch stopped");
            })?;
        }
        debug!(id = %target.id, count = ops.len(), "batch applied");
        Ok(())
    }

    /// Replace the session's buffer and reset its formatting.
    pub async fn begin(&self, reference: Option<SessionId>) -> Result<()> {
        let target = self.lookup(reference, true).await?;
        target.session.lock().await.begin(self.encoder.as_ref());
        Ok(())
    }

    /// Wrap the buffer in the protocol envelope and queue it on the link.
    ///
    /// The buffer itself is left as is.
    pub async fn write(&self, reference: Option<SessionId>) -> Result<()> {
        let target = self.lookup(reference, true).await?;
        let session = target.session.lock().await;

        if self.transport.state(target.handle) != LinkState::Connected {
            return Err(ThermolinkError::NotConnected);
        }

        let envelope = session.envelope(self.encoder.as_ref());
        debug!(id = %target.id, bytes = envelope.len(), "flushing");
        self.transport.write(target.handle, envelope)
    }

    /// Snapshot of a session's buffered bytes.
    pub async fn buffered(&self, reference: Option<SessionId>) -> Result<Vec<u8>> {
        let target = self.lookup(reference, false).await?;
        let session = target.session.lock().await;
        Ok(session.buffer().as_bytes().to_vec())
    }

    /// Snapshot of a session's formatting state.
    pub async fn formatting(&self, reference: Option<SessionId>) -> Result<FormattingState> {
        let target = self.lookup(reference, false).await?;
        let formatting = *target.session.lock().await.formatting();
        Ok(formatting)
    }

    // ------------------------------------------------------------------------
    // Lifecycle (driven by the event router)
    // ------------------------------------------------------------------------

    /// `Pending → Active` for the session owning `handle`.
    ///
    /// `None` for unknown handles and sessions that are not pending.
    pub(crate) async fn promote(&self, handle: TransportHandle) -> Option<Promoted> {
        let mut tables = self.tables.lock().await;
        let id = *tables.by_handle.get(&handle)?;
        let name = self.transport.device_name(handle);
        tables.promote(id, name)
    }

    /// Remove the session owning `handle` from every view.
    pub(crate) async fn remove_by_handle(&self, handle: TransportHandle) -> Option<Removed> {
        let mut tables = self.tables.lock().await;
        let id = *tables.by_handle.get(&handle)?;
        let removed = tables.remove(id)?;
        self.transport.release(removed.handle);
        Some(removed)
    }

    /// Close every link and forget every session.
    ///
    /// Close failures are logged and skipped. Waiting connect callers see
    /// `None`.
    pub async fn shutdown(&self) {
        let mut tables = self.tables.lock().await;
        for (id, entry) in &tables.sessions {
            if let Err(e) = self.transport.close(entry.handle) {
                debug!(%id, error = %e, "close failed during shutdown");
            }
            self.transport.release(entry.handle);
        }

        let count = tables.sessions.len();
        *tables = Tables::default();
        drop(tables);

        self.shutdown.send_replace(true);
        info!(sessions = count, "registry shut down");
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn pick(tables: &Tables, reference: Option<SessionId>, require_active: bool) -> Result<SessionId> {
        let id = match reference {
            Some(id) => id,
            None => {
                let mut ids = tables.sessions.keys();
                match (ids.next(), ids.next()) {
                    (Some(&id), None) => id,
                    (None, _) => return Err(ThermolinkError::UnknownSession),
                    (Some(_), Some(_)) => return Err(ThermolinkError::AmbiguousSession),
                }
            }
        };

        let entry = tables
            .sessions
            .get(&id)
            .ok_or(ThermolinkError::UnknownSession)?;
        if require_active && entry.state != LifecycleState::Active {
            return Err(ThermolinkError::NotConnected);
        }
        Ok(id)
    }

    async fn lookup(&self, reference: Option<SessionId>, require_active: bool) -> Result<Resolved> {
        let tables = self.tables.lock().await;
        let id = Self::pick(&tables, reference, require_active)?;
        let entry = tables
            .sessions
            .get(&id)
            .ok_or(ThermolinkError::UnknownSession)?;
        Ok(Resolved {
            id,
            handle: entry.handle,
            state: entry.state,
            session: Arc::clone(&entry.session),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EscPosEncoder;
    use crate::transport::{MockTransport, event_channel};

    fn registry() -> (Arc<MockTransport>, ConnectionRegistry) {
        let (tx, _rx) = event_channel();
        let mock = Arc::new(MockTransport::new(tx));
        let registry = ConnectionRegistry::new(mock.clone(), Arc::new(EscPosEncoder), EventHub::new());
        (mock, registry)
    }

    async fn activate(mock: &MockTransport, registry: &ConnectionRegistry, address: &str) -> SessionId {
        let Connecting::Pending(pending) = registry.begin_connect(address, None).await.unwrap() else {
            panic!("expected a pending connect");
        };
        let handle = mock.handle_for(address).unwrap();
        mock.succeed(handle);
        registry.promote(handle).await.unwrap();
        pending.session_id()
    }

    #[tokio::test]
    async fn test_pending_session_views() {
        let (_, registry) = registry();
        registry.begin_connect("AA:BB", None).await.unwrap();

        assert_eq!(
            registry.stats().await,
            RegistryStats {
                sessions: 1,
                active_by_address: 0,
                pending_by_address: 1,
                by_handle: 1,
                pending_requests: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_second_connect_while_pending() {
        let (_, registry) = registry();
        registry.begin_connect("AA:BB", None).await.unwrap();
        assert!(matches!(
            registry.begin_connect("AA:BB", None).await,
            Err(ThermolinkError::AlreadyConnecting)
        ));
    }

    #[tokio::test]
    async fn test_connect_when_active_returns_existing() {
        let (mock, registry) = registry();
        let id = activate(&mock, &registry, "AA:BB").await;

        match registry.begin_connect("AA:BB", None).await.unwrap() {
            Connecting::Ready(identity) => assert_eq!(identity.connection_id, id),
            Connecting::Pending(_) => panic!("expected the existing session"),
        }
    }

    #[tokio::test]
    async fn test_handle_creation_failure_leaves_nothing() {
        let (mock, registry) = registry();
        mock.reject_address("AA:BB");
        assert!(matches!(
            registry.begin_connect("AA:BB", None).await,
            Err(ThermolinkError::InterfaceCreationFailed(_))
        ));
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn test_open_failure_discards_session() {
        let (mock, registry) = registry();
        mock.fail_open("AA:BB");
        assert!(matches!(
            registry.begin_connect("AA:BB", None).await,
            Err(ThermolinkError::Transport(_))
        ));
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn test_resolve_policy() {
        let (mock, registry) = registry();
        assert!(matches!(
            registry.resolve(None, false).await,
            Err(ThermolinkError::UnknownSession)
        ));

        let id = activate(&mock, &registry, "AA:BB").await;
        assert_eq!(registry.resolve(None, true).await.unwrap().connection_id, id);

        activate(&mock, &registry, "CC:DD").await;
        assert!(matches!(
            registry.resolve(None, false).await,
            Err(ThermolinkError::AmbiguousSession)
        ));
        assert_eq!(registry.resolve(Some(id), true).await.unwrap().address, "AA:BB");
        assert!(matches!(
            registry.resolve(Some(SessionId::new()), false).await,
            Err(ThermolinkError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn test_pending_session_is_not_active() {
        let (_, registry) = registry();
        registry.begin_connect("AA:BB", None).await.unwrap();
        assert!(matches!(
            registry.resolve(None, true).await,
            Err(ThermolinkError::NotConnected)
        ));
        assert!(matches!(
            registry.disconnect(None).await,
            Err(ThermolinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_is_connected_does_not_remove() {
        let (mock, registry) = registry();
        let id = activate(&mock, &registry, "AA:BB").await;
        assert!(registry.is_connected(Some(id)).await);

        mock.drop_silently(mock.handle_for("AA:BB").unwrap());
        assert!(!registry.is_connected(Some(id)).await);
        assert!(!registry.is_connected(None).await);
        assert_eq!(registry.stats().await.sessions, 1);
    }

    #[tokio::test]
    async fn test_write_requires_live_link() {
        let (mock, registry) = registry();
        let id = activate(&mock, &registry, "AA:BB").await;

        mock.drop_silently(mock.handle_for("AA:BB").unwrap());
        assert!(matches!(
            registry.write(Some(id)).await,
            Err(ThermolinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let (mock, registry) = registry();
        activate(&mock, &registry, "AA:BB").await;
        activate(&mock, &registry, "CC:DD").await;
        mock.fail_close(mock.handle_for("CC:DD").unwrap());
        let Connecting::Pending(pending) = registry.begin_connect("EE:FF", None).await.unwrap() else {
            panic!("expected a pending connect");
        };

        let signal = registry.shutdown_signal();
        registry.shutdown().await;

        assert_eq!(registry.stats().await, RegistryStats::default());
        assert!(*signal.borrow());
        assert_eq!(pending.wait().await, None);
        assert!(mock.is_released(mock.handle_for("AA:BB").unwrap()));
    }
}
