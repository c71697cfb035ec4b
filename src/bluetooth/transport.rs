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

//! Transport capabilities the connection manager depends on.
//!
//! A transport opens a named listening endpoint and dials peers by address.
//! Sockets are plain duplex byte streams; dropping one closes it, and that
//! is the only cancellation primitive the manager relies on.

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use super::events::PeerIdentity;

/// Connected duplex byte stream.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<S> Socket for S where S: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Listening endpoint. Dropping it stops accepting and unblocks `accept`.
pub trait Acceptor: Send + 'static {
    type Stream: Socket;

    /// Wait for the next inbound connection.
    fn accept(&mut self) -> BoxFuture<'_, Result<(Self::Stream, PeerIdentity)>>;
}

/// Source of sockets for the connection manager.
pub trait Transport: Send + Sync + 'static {
    type Stream: Socket;
    type Acceptor: Acceptor<Stream = Self::Stream>;

    /// Open the listening endpoint under the service's well-known identity.
    fn listen(&self) -> BoxFuture<'_, Result<Self::Acceptor>>;

    /// Perform a single connect attempt to `address`.
    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<(Self::Stream, PeerIdentity)>>;
}
