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

//! Bluetooth RFCOMM transport over BlueZ.

use anyhow::{anyhow, Context, Result};
use bluer::rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream};
use bluer::{Adapter, Address, ErrorKind};
use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::PeerIdentity;
use super::transport::{Acceptor, Transport};
use crate::config::BluetoothConfig;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM transport bound to the default adapter.
pub struct RfcommTransport {
    session: bluer::Session,
    adapter: Adapter,
    config: BluetoothConfig,
}

impl RfcommTransport {
    /// Open a BlueZ session and prepare the default adapter.
    ///
    /// Fails when the adapter is missing, powered off (and `power_on` is
    /// disabled) or BlueZ refuses access.
    pub async fn new(config: BluetoothConfig) -> Result<Self> {
        info!("Initializing Bluetooth transport...");

        let session = bluer::Session::new()
            .await
            .map_err(authorization_error)
            .context("Unable to open BlueZ session")?;
        info!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(authorization_error)
            .context("No Bluetooth adapter available")?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await.map_err(authorization_error)? {
            if !config.power_on {
                return Err(anyhow!(
                    "Bluetooth adapter {} is powered off",
                    adapter.name()
                ));
            }
            info!("Powering on Bluetooth adapter...");
            adapter
                .set_powered(true)
                .await
                .map_err(authorization_error)?;
        }

        Ok(Self {
            session,
            adapter,
            config,
        })
    }

    /// Get the adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    /// Get bonded devices.
    pub async fn paired_devices(&self) -> Result<Vec<PeerIdentity>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                devices.push(PeerIdentity::new(
                    addr.to_string(),
                    self.peer_name(addr).await,
                ));
            }
        }

        Ok(devices)
    }

    /// Alias of `addr`, falling back to the address itself.
    async fn peer_name(&self, addr: Address) -> String {
        let alias = match self.adapter.device(addr) {
            Ok(device) => device.alias().await.ok(),
            Err(_) => None,
        };
        alias.unwrap_or_else(|| addr.to_string())
    }

    fn profile(&self) -> Profile {
        Profile {
            uuid: self.config.service_uuid,
            name: Some(self.config.service_name.clone()),
            channel: Some(self.config.channel.into()),
            role: Some(Role::Server),
            require_authentication: Some(self.config.require_authentication),
            require_authorization: Some(false),
            ..Default::default()
        }
    }
}

/// Turn BlueZ permission refusals into an explicit authorization error.
fn authorization_error(err: bluer::Error) -> anyhow::Error {
    match err.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            anyhow!("Not authorized to use Bluetooth: {}", err)
        }
        _ => err.into(),
    }
}

/// Registered RFCOMM server profile. Dropping it unregisters the service.
pub struct RfcommAcceptor {
    handle: ProfileHandle,
    adapter: Adapter,
}

impl Acceptor for RfcommAcceptor {
    type Stream = Stream;

    fn accept(&mut self) -> BoxFuture<'_, Result<(Stream, PeerIdentity)>> {
        Box::pin(async move {
            let request = self
                .handle
                .next()
                .await
                .ok_or_else(|| anyhow!("RFCOMM profile unregistered"))?;

            let addr = request.device();
            debug!("Connect request from {}", addr);
            let stream = request.accept().map_err(authorization_error)?;

            let name = match self.adapter.device(addr) {
                Ok(device) => device.alias().await.unwrap_or_else(|_| addr.to_string()),
                Err(_) => addr.to_string(),
            };
            Ok((stream, PeerIdentity::new(addr.to_string(), name)))
        })
    }
}

impl Transport for RfcommTransport {
    type Stream = Stream;
    type Acceptor = RfcommAcceptor;

    fn listen(&self) -> BoxFuture<'_, Result<RfcommAcceptor>> {
        Box::pin(async move {
            let handle = self
                .session
                .register_profile(self.profile())
                .await
                .map_err(authorization_error)
                .with_context(|| {
                    format!("Unable to register service '{}'", self.config.service_name)
                })?;
            info!(
                "RFCOMM service '{}' ({}) listening on channel {}",
                self.config.service_name, self.config.service_uuid, self.config.channel
            );

            Ok(RfcommAcceptor {
                handle,
                adapter: self.adapter.clone(),
            })
        })
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<(Stream, PeerIdentity)>> {
        Box::pin(async move {
            let addr: Address = address
                .parse()
                .with_context(|| format!("Invalid Bluetooth address: {}", address))?;

            let target = SocketAddr::new(addr, self.config.channel);
            let stream = Stream::connect(target).await.map_err(|e| {
                warn!("RFCOMM connect to {} failed: {}", addr, e);
                e
            })?;

            let name = self.peer_name(addr).await;
            Ok((stream, PeerIdentity::new(addr.to_string(), name)))
        })
    }
}
