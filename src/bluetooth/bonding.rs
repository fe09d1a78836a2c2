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

//! Locally initiated bonding.

use bluer::Address;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::platform::BondBackend;
use crate::error::{Error, Result};
use crate::state::BondState;

/// Tracks the single bonding attempt started from this device.
#[derive(Debug, Default)]
pub struct BondingWatcher {
    in_flight: Mutex<Option<Address>>,
}

/// Releases the in-flight slot on every exit path.
struct InFlight<'a> {
    slot: &'a Mutex<Option<Address>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

impl BondingWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device currently being bonded, if any.
    pub fn in_flight(&self) -> Option<Address> {
        *self.in_flight.lock()
    }

    /// Bond with `address` and wait for the outcome.
    ///
    /// Resolves `true` once bonded and `false` when the bond ends up not
    /// established (for example the user declined).
    pub async fn bond_device<B: BondBackend>(&self, backend: &B, address: Address) -> Result<bool> {
        let _guard = self.claim(address)?;

        match backend.bond_state(address).await.map_err(bond_failure)? {
            BondState::Bonding => return Err(Error::bond("device already bonding")),
            BondState::Bonded => return Err(Error::bond("device already bonded")),
            _ => {}
        }

        let mut transitions = backend
            .subscribe_bond_state(address)
            .await
            .map_err(bond_failure)?;

        if !backend.create_bond(address).await.map_err(bond_failure)? {
            return Err(Error::bond("error starting bonding process"));
        }
        info!("Bonding with {} started", address);

        while let Some(state) = transitions.next().await {
            match state {
                BondState::Bonding => debug!("Bonding with {} in progress", address),
                BondState::Bonded => {
                    info!("Bonded with {}", address);
                    return Ok(true);
                }
                BondState::None => {
                    info!("Bonding with {} not established", address);
                    return Ok(false);
                }
                BondState::Unknown(raw) => {
                    warn!("Invalid bond state {} while bonding {}", raw, address);
                    return Err(Error::bond("invalid bond state while bonding"));
                }
            }
        }

        Err(Error::bond("bond state updates ended while bonding"))
    }

    fn claim(&self, address: Address) -> Result<InFlight<'_>> {
        let mut slot = self.in_flight.lock();
        if slot.is_some() {
            return Err(Error::bond("another bonding process is ongoing from local device"));
        }
        *slot = Some(address);
        Ok(InFlight {
            slot: &self.in_flight,
        })
    }
}

/// Remove the bond with `address`.
pub async fn remove_device_bond<B: BondBackend>(backend: &B, address: Address) -> Result<bool> {
    match backend.bond_state(address).await.map_err(bond_failure)? {
        BondState::Bonding => Err(Error::bond("device already bonding")),
        BondState::None => Err(Error::bond("device already unbonded")),
        _ => backend.remove_bond(address).await.map_err(|e| match e {
            Error::Bond(_) | Error::NoPermissions(_) => e,
            other => Error::bond(format!("error while unbonding: {}", other)),
        }),
    }
}

/// Stack failures during bonding surface as bond errors.
pub(crate) fn bond_failure(err: Error) -> Error {
    match err {
        Error::Bond(_) | Error::NoPermissions(_) => err,
        other => Error::bond(format!("error while bonding: {}", other)),
    }
}
