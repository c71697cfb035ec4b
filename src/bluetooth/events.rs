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

//! Connection lifecycle types and the event sink seam.

use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// Lifecycle state of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing running.
    #[default]
    Idle,
    /// Accepting inbound connections.
    Listening,
    /// Outbound connect attempt in progress.
    Dialing,
    /// A session is live.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Listening => "Listening",
            ConnectionState::Dialing => "Dialing",
            ConnectionState::Connected => "Connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote peer, known once a socket is accepted or dialed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub address: String,
    pub name: String,
}

impl PeerIdentity {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// State machine moved to a new state.
    StateChanged(ConnectionState),
    /// Remote peer of the new session.
    PeerIdentified { name: String, address: String },
    /// Bytes read from the session socket, one chunk per read.
    DataReceived(Vec<u8>),
    /// Bytes written to the session socket.
    DataSent(Vec<u8>),
    /// Human readable failure or disconnect notice.
    Advisory(String),
}

/// Observer of connection events.
///
/// Called from worker tasks and from the caller's thread while the manager
/// lock is held. Implementations must not block and must not call back into
/// the manager.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: ConnectionEvent);
}

impl EventSink for mpsc::UnboundedSender<ConnectionEvent> {
    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::Sender<ConnectionEvent> {
    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!("Event channel full, dropping {:?}", event);
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }
}
