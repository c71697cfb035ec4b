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

//! Session worker: duplex pump over an established connection.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{ConnectionEvent, PeerIdentity};
use super::manager::Shared;
use super::transport::{Socket, Transport};
use super::worker::{CancelSignal, RoleWorkerHandle};

/// Read buffer size used when none is configured.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Live session: the worker that owns the socket plus its send queue.
#[derive(Debug)]
pub(super) struct SessionHandle {
    pub(super) worker: RoleWorkerHandle,
    pub(super) outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub(super) peer: PeerIdentity,
}

impl SessionHandle {
    /// Queue a frame for the writer. Returns false if the worker is gone.
    pub(super) fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(frame).is_ok()
    }

    pub(super) fn cancel(&mut self) {
        self.worker.cancel();
    }
}

/// Why a session pump stopped.
#[derive(Debug)]
enum SessionEnd {
    /// Cancelled or superseded; nothing to report.
    Cancelled,
    /// Send queue closed by the manager.
    Released,
    /// Transport failed on read.
    Lost(String),
}

/// Run the session until the transport fails or the worker is cancelled.
pub(super) async fn run_session<T: Transport>(
    shared: Arc<Shared<T>>,
    id: u64,
    stream: T::Stream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    mut cancel: CancelSignal,
) {
    info!("Session worker {} started", id);

    let (reader, writer) = tokio::io::split(stream);

    let end = tokio::select! {
        biased;
        _ = &mut cancel => SessionEnd::Cancelled,
        end = read_loop(&shared, id, reader) => end,
        end = write_loop(&shared, id, writer, &mut outbound) => end,
    };

    // Both halves are dropped by now, so the socket is closed.
    match end {
        SessionEnd::Cancelled => debug!("Session worker {} cancelled", id),
        SessionEnd::Released => debug!("Session worker {} released", id),
        SessionEnd::Lost(reason) => {
            info!("Session worker {} lost connection: {}", id, reason);
            shared.session_lost(id);
        }
    }
}

async fn read_loop<T: Transport>(
    shared: &Shared<T>,
    id: u64,
    mut reader: ReadHalf<T::Stream>,
) -> SessionEnd {
    let mut buffer = vec![0u8; shared.read_buffer_size()];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                return SessionEnd::Lost("connection closed by remote".to_string());
            }
            Ok(n) => {
                debug!("Session worker {} received {} bytes", id, n);
                let event = ConnectionEvent::DataReceived(buffer[..n].to_vec());
                if !shared.session_event(id, event) {
                    return SessionEnd::Cancelled;
                }
            }
            Err(e) => {
                return SessionEnd::Lost(format!("read error: {e}"));
            }
        }
    }
}

async fn write_loop<T: Transport>(
    shared: &Shared<T>,
    id: u64,
    mut writer: WriteHalf<T::Stream>,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> SessionEnd {
    while let Some(frame) = outbound.recv().await {
        let event = match write_frame(&mut writer, &frame).await {
            Ok(()) => {
                debug!("Session worker {} sent {} bytes", id, frame.len());
                ConnectionEvent::DataSent(frame)
            }
            Err(e) => {
                // Only a failed read tears the session down.
                warn!("Session worker {} write error: {}", id, e);
                ConnectionEvent::Advisory(format!("Unable to send data: {e}"))
            }
        };
        if !shared.session_event(id, event) {
            return SessionEnd::Cancelled;
        }
    }

    SessionEnd::Released
}

async fn write_frame<S: Socket>(writer: &mut WriteHalf<S>, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
