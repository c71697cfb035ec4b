// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection manager: owns the one current connection and its role workers.
//!
//! All state reads, state changes and worker handle swaps happen under a
//! single lock. The lock is never held across a socket operation; workers do
//! their blocking work unlocked and report back through [`Shared`], where
//! every report is checked against the worker id currently on record so a
//! superseded worker can never change state or emit events.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{ConnectionEvent, ConnectionState, EventSink, PeerIdentity};
use super::session::{self, SessionHandle, DEFAULT_READ_BUFFER_SIZE};
use super::transport::Transport;
use super::worker::{self, Role, RoleWorkerHandle};

/// Advisory emitted when an outbound connect attempt fails.
pub const ADVISORY_CONNECT_FAILED: &str = "Unable to connect device";

/// Advisory emitted when a live session drops.
pub const ADVISORY_CONNECTION_LOST: &str = "Device connection was lost";

/// Which role workers are currently on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveRoles {
    pub listening: bool,
    pub dialing: bool,
    pub session: bool,
}

/// What a listen worker should do after handing over an accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AcceptOutcome {
    /// Socket was rejected; keep accepting.
    Continue,
    /// Connection established or listener superseded; exit.
    Stop,
}

/// State guarded by the manager lock.
#[derive(Debug, Default)]
struct Core {
    state: ConnectionState,
    listener: Option<RoleWorkerHandle>,
    dialer: Option<RoleWorkerHandle>,
    session: Option<SessionHandle>,
    next_worker_id: u64,
}

impl Core {
    fn next_id(&mut self) -> u64 {
        self.next_worker_id += 1;
        self.next_worker_id
    }

    fn is_listener(&self, id: u64) -> bool {
        self.listener.as_ref().map(RoleWorkerHandle::id) == Some(id)
    }

    fn is_dialer(&self, id: u64) -> bool {
        self.dialer.as_ref().map(RoleWorkerHandle::id) == Some(id)
    }

    fn is_session(&self, id: u64) -> bool {
        self.session.as_ref().map(|s| s.worker.id()) == Some(id)
    }

    fn cancel_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.cancel();
        }
    }

    fn cancel_dialer(&mut self) {
        if let Some(mut dialer) = self.dialer.take() {
            dialer.cancel();
        }
    }

    fn cancel_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("Closing session with {}", session.peer);
            session.cancel();
        }
    }
}

/// State shared between the manager and its workers.
pub(crate) struct Shared<T: Transport> {
    transport: T,
    sink: Arc<dyn EventSink>,
    runtime: Handle,
    read_buffer_size: usize,
    core: Mutex<Core>,
}

impl<T: Transport> Shared<T> {
    pub(super) fn transport(&self) -> &T {
        &self.transport
    }

    pub(super) fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    fn set_state(&self, core: &mut Core, state: ConnectionState) {
        if core.state == state {
            return;
        }
        info!("Connection state: {} -> {}", core.state, state);
        core.state = state;
        self.sink.emit(ConnectionEvent::StateChanged(state));
    }

    fn advise(&self, message: impl Into<String>) {
        self.sink.emit(ConnectionEvent::Advisory(message.into()));
    }

    fn start_locked(self: &Arc<Self>, core: &mut Core) {
        core.cancel_dialer();
        core.cancel_session();

        if core.listener.is_none() {
            let id = core.next_id();
            let (handle, cancel) = RoleWorkerHandle::new(Role::Listen, id);
            self.runtime
                .spawn(worker::run_listener(Arc::clone(self), id, cancel));
            core.listener = Some(handle);
        }

        self.set_state(core, ConnectionState::Listening);
    }

    fn dial_locked(self: &Arc<Self>, core: &mut Core, address: &str) {
        core.cancel_dialer();
        core.cancel_session();

        let id = core.next_id();
        let (handle, cancel) = RoleWorkerHandle::new(Role::Dial, id);
        self.runtime.spawn(worker::run_dialer(
            Arc::clone(self),
            id,
            address.to_string(),
            cancel,
        ));
        core.dialer = Some(handle);

        self.set_state(core, ConnectionState::Dialing);
    }

    fn connected_locked(self: &Arc<Self>, core: &mut Core, stream: T::Stream, peer: PeerIdentity) {
        // A connection exists now: stop dialing and accepting.
        core.cancel_dialer();
        core.cancel_session();
        core.cancel_listener();

        let id = core.next_id();
        let (handle, cancel) = RoleWorkerHandle::new(Role::Session, id);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.runtime.spawn(session::run_session(
            Arc::clone(self),
            id,
            stream,
            outbound_rx,
            cancel,
        ));
        core.session = Some(SessionHandle {
            worker: handle,
            outbound: outbound_tx,
            peer: peer.clone(),
        });

        self.set_state(core, ConnectionState::Connected);
        self.sink.emit(ConnectionEvent::PeerIdentified {
            name: peer.name,
            address: peer.address,
        });
    }

    fn stop_locked(&self, core: &mut Core) {
        core.cancel_listener();
        core.cancel_dialer();
        core.cancel_session();
        self.set_state(core, ConnectionState::Idle);
    }

    /// A listen worker accepted `stream`.
    pub(super) fn accepted(
        self: &Arc<Self>,
        id: u64,
        stream: T::Stream,
        peer: PeerIdentity,
    ) -> AcceptOutcome {
        let mut core = self.core.lock();
        if !core.is_listener(id) {
            debug!("Listen worker {} superseded, closing socket from {}", id, peer);
            return AcceptOutcome::Stop;
        }

        let state = core.state;
        match state {
            ConnectionState::Listening | ConnectionState::Dialing => {
                self.connected_locked(&mut core, stream, peer);
                AcceptOutcome::Stop
            }
            ConnectionState::Idle | ConnectionState::Connected => {
                info!("Rejecting connection from {} while {}", peer, state);
                drop(stream);
                AcceptOutcome::Continue
            }
        }
    }

    /// A dial worker connected `stream`.
    pub(super) fn dialed(self: &Arc<Self>, id: u64, stream: T::Stream, peer: PeerIdentity) {
        let mut core = self.core.lock();
        if !core.is_dialer(id) {
            debug!("Dial worker {} superseded, closing socket to {}", id, peer);
            return;
        }
        self.connected_locked(&mut core, stream, peer);
    }

    /// A dial worker's connect attempt failed.
    pub(super) fn dial_failed(self: &Arc<Self>, id: u64) {
        let mut core = self.core.lock();
        if !core.is_dialer(id) {
            debug!("Ignoring failure of superseded dial worker {}", id);
            return;
        }
        core.dialer = None;
        self.advise(ADVISORY_CONNECT_FAILED);
        self.start_locked(&mut core);
    }

    /// A listen worker could not open its endpoint or accept failed.
    pub(super) fn listen_failed(&self, id: u64, message: String) {
        let mut core = self.core.lock();
        if !core.is_listener(id) {
            debug!("Ignoring failure of superseded listen worker {}", id);
            return;
        }
        // The state stays put; a later `start` respawns the empty slot.
        core.listener = None;
        self.advise(message);
    }

    /// The session worker's read side failed.
    pub(super) fn session_lost(self: &Arc<Self>, id: u64) {
        let mut core = self.core.lock();
        if !core.is_session(id) {
            debug!("Ignoring loss of superseded session worker {}", id);
            return;
        }
        core.session = None;
        self.advise(ADVISORY_CONNECTION_LOST);
        self.start_locked(&mut core);
    }

    /// Emit a session data event. Returns false once the session is superseded.
    pub(super) fn session_event(&self, id: u64, event: ConnectionEvent) -> bool {
        let core = self.core.lock();
        if !core.is_session(id) {
            return false;
        }
        self.sink.emit(event);
        true
    }
}

/// Owns the current connection and the workers competing to establish it.
pub struct ConnectionManager<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create an idle manager. Must be called within a tokio runtime.
    pub fn new(transport: T, sink: impl EventSink) -> Result<Self> {
        Self::with_read_buffer_size(transport, sink, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Create an idle manager whose sessions read up to `read_buffer_size`
    /// bytes at a time.
    pub fn with_read_buffer_size(
        transport: T,
        sink: impl EventSink,
        read_buffer_size: usize,
    ) -> Result<Self> {
        if read_buffer_size == 0 {
            return Err(anyhow!("Read buffer size must be greater than zero"));
        }
        let runtime =
            Handle::try_current().context("Connection manager requires a tokio runtime")?;

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                sink: Arc::new(sink),
                runtime,
                read_buffer_size,
                core: Mutex::new(Core::default()),
            }),
        })
    }

    /// Listen for inbound connections, dropping any dial or session.
    pub fn start(&self) {
        let mut core = self.shared.core.lock();
        self.shared.start_locked(&mut core);
    }

    /// Dial `address`, dropping any earlier dial or session.
    ///
    /// A running listener keeps accepting; whichever side connects first wins.
    pub fn dial(&self, address: &str) {
        let mut core = self.shared.core.lock();
        self.shared.dial_locked(&mut core, address);
    }

    /// Queue `frame` on the current session.
    ///
    /// Returns false, without writing anything, when not connected.
    pub fn send(&self, frame: impl Into<Vec<u8>>) -> bool {
        let core = self.shared.core.lock();
        if core.state != ConnectionState::Connected {
            debug!("Not connected, dropping outbound frame");
            return false;
        }
        match core.session.as_ref() {
            Some(session) => session.send(frame.into()),
            None => {
                warn!("Connected without a session");
                false
            }
        }
    }

    /// Cancel every worker and go idle.
    pub fn stop(&self) {
        let mut core = self.shared.core.lock();
        self.shared.stop_locked(&mut core);
    }

    /// Current connection state.
    pub fn current_state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    /// Peer of the live session, if any.
    pub fn connected_peer(&self) -> Option<PeerIdentity> {
        let core = self.shared.core.lock();
        core.session.as_ref().map(|s| s.peer.clone())
    }

    /// Which worker slots are occupied right now.
    pub fn active_roles(&self) -> ActiveRoles {
        let core = self.shared.core.lock();
        ActiveRoles {
            listening: core.listener.is_some(),
            dialing: core.dialer.is_some(),
            session: core.session.is_some(),
        }
    }

    /// The transport this manager listens and dials on.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        let mut core = self.shared.core.lock();
        core.cancel_listener();
        core.cancel_dialer();
        core.cancel_session();
    }
}
