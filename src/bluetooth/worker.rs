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

//! Role workers: cancellable background tasks for listening and dialing.
//!
//! Each worker owns its endpoint or socket outright. Cancelling a worker
//! resolves its cancel signal, the worker's `select!` drops whatever it was
//! blocked on, and the endpoint closes with it.

use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::manager::{AcceptOutcome, Shared};
use super::transport::{Acceptor, Transport};

/// Job a background worker performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listen,
    Dial,
    Session,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Listen => "listen",
            Role::Dial => "dial",
            Role::Session => "session",
        };
        f.write_str(name)
    }
}

/// Receiving side of a worker's cancel request.
///
/// Resolves on an explicit cancel and when the handle is dropped.
pub type CancelSignal = oneshot::Receiver<()>;

/// Handle to a running role worker, held only by the manager.
#[derive(Debug)]
pub struct RoleWorkerHandle {
    role: Role,
    id: u64,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl RoleWorkerHandle {
    pub(crate) fn new(role: Role, id: u64) -> (Self, CancelSignal) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = Self {
            role,
            id,
            cancel_tx: Some(cancel_tx),
        };
        (handle, cancel_rx)
    }

    #[cfg(test)]
    fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    #[cfg(test)]
    fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }

    /// Ask the worker to exit. Idempotent and never blocks.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            debug!("Cancelling {} worker {}", self.role, self.id);
            // Worker may already have exited.
            let _ = tx.send(());
        }
    }
}

impl Drop for RoleWorkerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Listen worker: open the endpoint and accept until connected or cancelled.
pub(super) async fn run_listener<T: Transport>(
    shared: Arc<Shared<T>>,
    id: u64,
    mut cancel: CancelSignal,
) {
    let mut acceptor = tokio::select! {
        biased;
        _ = &mut cancel => {
            debug!("Listen worker {} cancelled before endpoint opened", id);
            return;
        }
        opened = shared.transport().listen() => match opened {
            Ok(acceptor) => acceptor,
            Err(e) => {
                warn!("Listen worker {} could not open endpoint: {:#}", id, e);
                shared.listen_failed(id, format!("Unable to listen for connections: {e:#}"));
                return;
            }
        }
    };

    info!("Listen worker {} waiting for connections...", id);

    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!("Listen worker {} cancelled", id);
                return;
            }
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                info!("Inbound connection from {}", peer);
                if shared.accepted(id, stream, peer) == AcceptOutcome::Stop {
                    debug!("Listen worker {} done", id);
                    return;
                }
            }
            Err(e) => {
                // Close our endpoint before reporting.
                drop(acceptor);
                warn!("Listen worker {} accept error: {:#}", id, e);
                shared.listen_failed(id, format!("Accept failed: {e:#}"));
                return;
            }
        }
    }
}

/// Dial worker: one connect attempt to `address`.
pub(super) async fn run_dialer<T: Transport>(
    shared: Arc<Shared<T>>,
    id: u64,
    address: String,
    mut cancel: CancelSignal,
) {
    info!("Dial worker {} connecting to {}", id, address);

    let connected = tokio::select! {
        biased;
        _ = &mut cancel => {
            debug!("Dial worker {} cancelled", id);
            return;
        }
        connected = shared.transport().connect(&address) => connected,
    };

    match connected {
        Ok((stream, peer)) => {
            info!("Connected to {}", peer);
            shared.dialed(id, stream, peer);
        }
        Err(e) => {
            warn!("Dial worker {} failed to connect to {}: {:#}", id, address, e);
            shared.dial_failed(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut handle, mut signal) = RoleWorkerHandle::new(Role::Listen, 7);
        assert!(!handle.is_cancelled());

        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(signal.try_recv(), Ok(()));
    }

    #[test]
    fn test_drop_resolves_signal() {
        let (handle, mut signal) = RoleWorkerHandle::new(Role::Dial, 1);
        drop(handle);
        assert!(signal.try_recv().is_ok());
    }

    #[test]
    fn test_handle_identity() {
        let (handle, _signal) = RoleWorkerHandle::new(Role::Session, 42);
        assert_eq!(handle.role(), Role::Session);
        assert_eq!(handle.id(), 42);
        assert_eq!(Role::Session.to_string(), "session");
    }
}
