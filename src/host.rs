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

//! Method-call surface exposed to the host application.
//!
//! Every operation returns [`crate::Error`], whose [`crate::Error::code`] is
//! the identifier reported to the host.

use bluer::Address;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bluetooth::{
    bond_failure, remove_device_bond, BondingWatcher, ConnectionId, ConnectionRegistry, Platform,
    Session, SessionOptions, Subscription,
};
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};
use crate::events::ReadStream;
use crate::pairing::{PairingArbitrator, PairingDecider};
use crate::state::{AdapterState, BondState};

const ADDRESS_REQUIRED: &str = "'address' argument is required to be string containing remote MAC address";
const UNKNOWN_CONNECTION: &str = "there is no connection with provided id";

/// Bluetooth Classic connections, bonding and pairing for one adapter.
pub struct BluetoothClassic<P: Platform> {
    platform: Arc<P>,
    service_uuid: Uuid,
    options: SessionOptions,
    registry: Arc<ConnectionRegistry>,
    bonding: BondingWatcher,
    pairing: PairingArbitrator,
}

impl<P: Platform> BluetoothClassic<P> {
    pub fn new(platform: P, config: &BluetoothConfig, decider: Arc<dyn PairingDecider>) -> Self {
        Self {
            platform: Arc::new(platform),
            service_uuid: config.service_uuid,
            options: SessionOptions::from(config),
            registry: ConnectionRegistry::new(),
            bonding: BondingWatcher::new(),
            pairing: PairingArbitrator::new(decider),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn is_available(&self) -> bool {
        self.platform.is_available()
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        self.ensure_available()?;
        self.platform.is_enabled().await
    }

    pub async fn get_state(&self) -> Result<AdapterState> {
        self.ensure_available()?;
        self.platform.state().await
    }

    pub async fn get_address(&self) -> Result<String> {
        self.ensure_available()?;
        Ok(self.platform.address().await?.to_string())
    }

    pub async fn get_name(&self) -> Result<String> {
        self.ensure_available()?;
        self.platform.name().await
    }

    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.ensure_available()?;
        if name.is_empty() {
            return Err(Error::invalid_argument("'name' argument is required to be a non-empty string"));
        }
        self.platform.set_name(name).await
    }

    /// Connect to the configured service on `address`.
    ///
    /// Only Bluetooth Classic is supported; `is_le` must be `false`.
    pub async fn connect(&self, address: &str, is_le: bool) -> Result<ConnectionId> {
        if is_le {
            return Err(Error::invalid_argument("BLE connections are not supported"));
        }
        let address = parse_address(address)?;
        self.open(address, self.service_uuid).await
    }

    /// Connect to `service` (a UUID string) on `address`.
    pub async fn connect_to_service(&self, address: &str, service: &str) -> Result<ConnectionId> {
        let address = parse_address(address)?;
        let service = Uuid::parse_str(service)
            .map_err(|_| Error::invalid_argument("'uuid' argument is required to be a service UUID"))?;
        self.open(address, service).await
    }

    async fn open(&self, address: Address, service: Uuid) -> Result<ConnectionId> {
        self.ensure_available()?;
        info!("Connecting to {} (service {})", address, service);

        let session = Session::connect(&*self.platform, address, service, &self.options).await?;
        let id = match self.registry.register(session.clone()) {
            Ok(id) => id,
            Err(e) => {
                session.disconnect().await;
                return Err(e);
            }
        };
        info!("Connection {} established with {}", id, address);
        Ok(id)
    }

    pub async fn write(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        self.session(id)?.write(data).await
    }

    pub async fn write_str(&self, id: ConnectionId, text: &str) -> Result<()> {
        self.write(id, text.as_bytes()).await
    }

    /// Take the inbound stream of a connection.
    pub fn read_stream(&self, id: ConnectionId) -> Result<ReadStream> {
        self.session(id)?
            .take_read_stream()
            .ok_or_else(|| Error::Logic(format!("read stream of connection {} already taken", id)))
    }

    /// Close a connection and forget its id.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let session = self.session(id)?;
        session.disconnect().await;
        self.registry.unregister(id);
        debug!("Connection {} closed", id);
        Ok(())
    }

    pub async fn bond_device(&self, address: &str) -> Result<bool> {
        let address = parse_address(address)?;
        self.ensure_available()?;
        self.bonding.bond_device(&*self.platform, address).await
    }

    pub async fn remove_device_bond(&self, address: &str) -> Result<bool> {
        let address = parse_address(address)?;
        self.ensure_available()?;
        remove_device_bond(&*self.platform, address).await
    }

    pub async fn get_device_bond_state(&self, address: &str) -> Result<BondState> {
        let address = parse_address(address)?;
        self.ensure_available()?;
        self.platform.bond_state(address).await.map_err(bond_failure)
    }

    pub async fn pairing_request_handling_enable(&self) -> Result<()> {
        self.ensure_available()?;
        self.pairing.enable(&*self.platform).await
    }

    pub fn pairing_request_handling_disable(&self) {
        self.pairing.disable();
    }

    pub fn is_pairing_request_handling_enabled(&self) -> bool {
        self.pairing.is_enabled()
    }

    /// Observe adapter state changes.
    ///
    /// Every change disconnects all connections before it is delivered.
    pub async fn watch_state(&self) -> Result<Subscription<AdapterState>> {
        self.ensure_available()?;
        let mut changes = self.platform.state_changes().await?;
        let registry = self.registry.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(state) = changes.next().await {
                info!("Adapter state changed: {}", state.as_str());
                registry.disconnect_all().await;
                if tx.send(state).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::with_cancel(rx, move || task.abort()))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.platform.is_available() {
            Ok(())
        } else {
            Err(Error::Unavailable("no Bluetooth adapter".to_string()))
        }
    }

    fn session(&self, id: ConnectionId) -> Result<Arc<Session>> {
        self.registry
            .lookup(id)
            .ok_or_else(|| Error::invalid_argument(UNKNOWN_CONNECTION))
    }
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|_| Error::invalid_argument(ADDRESS_REQUIRED))
}
