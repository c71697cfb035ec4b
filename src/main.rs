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

//! ClappyLock link daemon.
//!
//! Usage: clappylock-link [listen | dial <ADDRESS> | devices]

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clappylock_link::bluetooth::{ConnectionEvent, ConnectionManager, RfcommTransport};
use clappylock_link::command::Command;
use clappylock_link::config::Config;

enum Mode {
    Listen,
    Dial(String),
    Devices,
}

fn parse_args() -> Result<Mode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(|s| s.as_str()) {
        None | Some("listen") => Ok(Mode::Listen),
        Some("dial") => args
            .get(1)
            .map(|addr| Mode::Dial(addr.clone()))
            .ok_or_else(|| anyhow!("Usage: clappylock-link dial <ADDRESS>")),
        Some("devices") => Ok(Mode::Devices),
        Some(other) => Err(anyhow!(
            "Unknown mode '{}'. Usage: clappylock-link [listen | dial <ADDRESS> | devices]",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clappylock_link=info")),
        )
        .init();

    info!("Starting ClappyLock link v{}...", env!("CARGO_PKG_VERSION"));

    let mode = parse_args()?;

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let transport = RfcommTransport::new(config.bluetooth.clone()).await?;
    info!("Adapter address: {}", transport.address().await?);

    if let Mode::Devices = mode {
        for device in transport.paired_devices().await? {
            println!("{}\t{}", device.address, device.name);
        }
        return Ok(());
    }

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<ConnectionEvent>();
    let manager = ConnectionManager::with_read_buffer_size(
        transport,
        event_tx,
        config.session.read_buffer_size,
    )?;

    match mode {
        Mode::Dial(address) => manager.dial(&address),
        _ => manager.start(),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Ready. Commands: on, off, start, stop, dial <ADDRESS>, quit");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => log_event(&event),
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };
                if !handle_line(&manager, line.trim()) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.stop();
    info!("ClappyLock link stopped");
    Ok(())
}

/// Apply one line of user input. Returns false to quit.
fn handle_line(manager: &ConnectionManager<RfcommTransport>, line: &str) -> bool {
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "" => {}
        "quit" | "exit" => return false,
        "start" => manager.start(),
        "stop" => manager.stop(),
        "dial" if !rest.trim().is_empty() => manager.dial(rest.trim()),
        _ => {
            let frame = match Command::parse(line) {
                Some(command) => Vec::from(command),
                None => line.as_bytes().to_vec(),
            };
            if !manager.send(frame) {
                warn!("Not connected ({}), nothing sent", manager.current_state());
            }
        }
    }
    true
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged(state) => info!("State: {}", state),
        ConnectionEvent::PeerIdentified { name, address } => {
            info!("Connected to {} ({})", name, address)
        }
        ConnectionEvent::DataReceived(bytes) => {
            let command = match bytes.as_slice() {
                [byte] => Command::from_byte(*byte),
                _ => None,
            };
            match command {
                Some(command) => info!("Received command {:?}", command),
                None => info!(
                    "Received {} bytes: {}",
                    bytes.len(),
                    String::from_utf8_lossy(bytes)
                ),
            }
        }
        ConnectionEvent::DataSent(bytes) => info!("Sent {} bytes", bytes.len()),
        ConnectionEvent::Advisory(message) => warn!("{}", message),
    }
}
