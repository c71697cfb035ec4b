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

//! Bluetooth communication module.
//!
//! Manages the single serial-profile connection to the remote peer: listening
//! for inbound connections, dialing out, and pumping bytes over the session.

mod events;
mod manager;
pub mod memory;
mod rfcomm;
mod session;
mod transport;
mod worker;

pub use events::{ConnectionEvent, ConnectionState, EventSink, PeerIdentity};
pub use manager::{
    ActiveRoles, ConnectionManager, ADVISORY_CONNECTION_LOST, ADVISORY_CONNECT_FAILED,
};
pub use memory::{MemoryStream, MemoryTransport};
pub use rfcomm::{RfcommAcceptor, RfcommTransport, SPP_UUID};
pub use session::DEFAULT_READ_BUFFER_SIZE;
pub use transport::{Acceptor, Socket, Transport};
pub use worker::{Role, RoleWorkerHandle};
