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

//! In-process transport over `tokio::io::duplex` pipes.
//!
//! Lets tests and demos play the remote peer: push inbound connections,
//! register reachable or unresponsive dial targets, make local writes fail,
//! and observe how many listening endpoints and connect attempts are alive.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use super::events::PeerIdentity;
use super::transport::{Acceptor, Transport};

/// Pipe buffer size for each direction.
const PIPE_CAPACITY: usize = 4096;

type Inbound = (MemoryStream, PeerIdentity);

#[derive(Debug, Clone)]
enum DialTarget {
    Reachable { name: String },
    /// Connect never completes until cancelled.
    Hanging,
}

#[derive(Debug, Default)]
struct MemoryState {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    targets: HashMap<String, DialTarget>,
    dialed: VecDeque<(PeerIdentity, DuplexStream)>,
    fail_listen: bool,
}

#[derive(Debug, Default)]
struct Counters {
    listen_calls: AtomicUsize,
    open_listeners: AtomicUsize,
    dial_calls: AtomicUsize,
    pending_dials: AtomicUsize,
}

/// In-memory [`Transport`]. Clones share the same simulated radio.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    counters: Arc<Counters>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` dialable, answering as `name`.
    pub fn add_peer(&self, address: &str, name: &str) {
        self.state.lock().targets.insert(
            address.to_string(),
            DialTarget::Reachable {
                name: name.to_string(),
            },
        );
    }

    /// Make dials to `address` block until cancelled.
    pub fn add_hanging_peer(&self, address: &str) {
        self.state
            .lock()
            .targets
            .insert(address.to_string(), DialTarget::Hanging);
    }

    /// Make subsequent `listen` calls fail.
    pub fn fail_listen(&self, fail: bool) {
        self.state.lock().fail_listen = fail;
    }

    /// Make writes on our end of every connection fail with `BrokenPipe`.
    ///
    /// Reads keep working, so the link itself stays up.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn pipe(&self) -> (MemoryStream, DuplexStream) {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let local = MemoryStream {
            inner: local,
            fail_writes: Arc::clone(&self.fail_writes),
        };
        (local, remote)
    }

    /// Connect to the open listening endpoint as `peer`.
    ///
    /// Returns the remote end of the new connection.
    pub fn inbound(&self, peer: PeerIdentity) -> Result<DuplexStream> {
        let state = self.state.lock();
        let inbound = state
            .inbound
            .as_ref()
            .ok_or_else(|| anyhow!("No listening endpoint"))?;

        let (local, remote) = self.pipe();
        inbound
            .send((local, peer))
            .map_err(|_| anyhow!("Listening endpoint closed"))?;
        Ok(remote)
    }

    /// Close the listening endpoint from the radio side, failing `accept`.
    pub fn drop_listener(&self) {
        self.state.lock().inbound = None;
    }

    /// Remote end of the oldest successful dial.
    pub fn take_dialed(&self) -> Option<(PeerIdentity, DuplexStream)> {
        self.state.lock().dialed.pop_front()
    }

    pub fn listen_calls(&self) -> usize {
        self.counters.listen_calls.load(Ordering::SeqCst)
    }

    /// Listening endpoints not yet dropped.
    pub fn open_listeners(&self) -> usize {
        self.counters.open_listeners.load(Ordering::SeqCst)
    }

    pub fn dial_calls(&self) -> usize {
        self.counters.dial_calls.load(Ordering::SeqCst)
    }

    /// Connect attempts still in flight.
    pub fn pending_dials(&self) -> usize {
        self.counters.pending_dials.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    OpenListeners,
    PendingDials,
}

/// Holds a gauge up while alive.
#[derive(Debug)]
struct Tracked {
    counters: Arc<Counters>,
    gauge: Gauge,
}

impl Tracked {
    fn new(counters: Arc<Counters>, gauge: Gauge) -> Self {
        counters.gauge(gauge).fetch_add(1, Ordering::SeqCst);
        Self { counters, gauge }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.gauge(self.gauge).fetch_sub(1, Ordering::SeqCst);
    }
}

impl Counters {
    fn gauge(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::OpenListeners => &self.open_listeners,
            Gauge::PendingDials => &self.pending_dials,
        }
    }
}

/// Our end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStream {
    fn write_error(&self) -> Option<io::Error> {
        self.fail_writes
            .load(Ordering::SeqCst)
            .then(|| io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"))
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(e) = self.write_error() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(e) = self.write_error() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Listening endpoint of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    rx: mpsc::UnboundedReceiver<Inbound>,
    _open: Tracked,
}

impl Acceptor for MemoryAcceptor {
    type Stream = MemoryStream;

    fn accept(&mut self) -> BoxFuture<'_, Result<(MemoryStream, PeerIdentity)>> {
        Box::pin(async move {
            self.rx
                .recv()
                .await
                .ok_or_else(|| anyhow!("Listening endpoint closed"))
        })
    }
}

impl Transport for MemoryTransport {
    type Stream = MemoryStream;
    type Acceptor = MemoryAcceptor;

    fn listen(&self) -> BoxFuture<'_, Result<MemoryAcceptor>> {
        Box::pin(async move {
            self.counters.listen_calls.fetch_add(1, Ordering::SeqCst);

            let mut state = self.state.lock();
            if state.fail_listen {
                return Err(anyhow!("Listening endpoint unavailable"));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            state.inbound = Some(tx);
            debug!("Memory listener opened");

            Ok(MemoryAcceptor {
                rx,
                _open: Tracked::new(Arc::clone(&self.counters), Gauge::OpenListeners),
            })
        })
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<(MemoryStream, PeerIdentity)>> {
        Box::pin(async move {
            self.counters.dial_calls.fetch_add(1, Ordering::SeqCst);
            let _pending = Tracked::new(Arc::clone(&self.counters), Gauge::PendingDials);

            let target = self.state.lock().targets.get(address).cloned();
            match target {
                Some(DialTarget::Reachable { name }) => {
                    let peer = PeerIdentity::new(address, name);
                    let (local, remote) = self.pipe();
                    self.state.lock().dialed.push_back((peer.clone(), remote));
                    Ok((local, peer))
                }
                Some(DialTarget::Hanging) => {
                    futures::future::pending::<()>().await;
                    Err(anyhow!("Connect to {} never completes", address))
                }
                None => Err(anyhow!("Peer {} is unreachable", address)),
            }
        })
    }
}
