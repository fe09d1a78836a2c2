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

//! Capabilities the Bluetooth stack has to provide.
//!
//! Everything above this module (sessions, registry, bonding, pairing) is
//! written against these traits; [`super::bluez`] implements them on top of
//! BlueZ.

use bluer::Address;
use std::future::Future;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::subscription::Subscription;
use crate::error::Result;
use crate::pairing::PairingEvent;
use crate::state::{AdapterState, BondState};

/// Failure of a single connection attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The socket itself could not be created; no fallback applies.
    #[error("socket unavailable: {0}")]
    SocketUnavailable(#[source] io::Error),
    /// The socket exists but the connection was not established.
    #[error("connection attempt failed: {0}")]
    Connect(#[source] io::Error),
}

/// Opens byte streams to remote devices.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Resolve the remote device behind `address`.
    fn resolve_device(&self, address: Address) -> impl Future<Output = Result<()>> + Send;

    /// Stop any discovery in progress on the adapter.
    fn cancel_discovery(&self) -> impl Future<Output = Result<()>> + Send;

    /// Connect to `service` on the remote device.
    fn open_service(
        &self,
        address: Address,
        service: Uuid,
    ) -> impl Future<Output = std::result::Result<Self::Stream, AttemptError>> + Send;

    /// Alternate connection strategy tried once after `open_service` fails.
    ///
    /// Works around stack bugs on some platform versions; its behaviour is
    /// version dependent and it may not exist at all, which is the default.
    fn open_alternate(&self, _address: Address) -> impl Future<Output = io::Result<Self::Stream>> + Send {
        async { Err(io::Error::from(io::ErrorKind::Unsupported)) }
    }
}

/// Bond state queries and the bonding primitive.
pub trait BondBackend: Send + Sync + 'static {
    fn bond_state(&self, address: Address) -> impl Future<Output = Result<BondState>> + Send;

    /// Observe bond state transitions of a single device.
    fn subscribe_bond_state(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Subscription<BondState>>> + Send;

    /// Start bonding. `Ok(false)` when the stack refuses to start.
    fn create_bond(&self, address: Address) -> impl Future<Output = Result<bool>> + Send;

    fn remove_bond(&self, address: Address) -> impl Future<Output = Result<bool>> + Send;
}

/// Source of pairing requests.
pub trait PairingBackend: Send + Sync + 'static {
    type Responder: PairingResponder;

    /// Start intercepting pairing requests until the subscription is dropped.
    fn intercept_pairing_requests(
        &self,
    ) -> impl Future<Output = Result<Subscription<PairingEvent<Self::Responder>>>> + Send;
}

/// Applies a decision to one intercepted pairing request.
pub trait PairingResponder: Send + 'static {
    /// Hold the request open while a decision is pending.
    fn defer(&mut self) {}

    fn set_pin(&mut self, pin: &str) -> Result<()>;

    fn set_pairing_confirmation(&mut self, confirm: bool) -> Result<()>;

    /// Hand the request to the system pairing UI.
    fn show_default_ui(&mut self);

    /// Complete the request; nothing can be applied afterwards.
    fn finish(self);
}

/// Local adapter queries.
pub trait AdapterBackend: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    fn is_enabled(&self) -> impl Future<Output = Result<bool>> + Send;

    fn state(&self) -> impl Future<Output = Result<AdapterState>> + Send;

    fn address(&self) -> impl Future<Output = Result<Address>> + Send;

    fn name(&self) -> impl Future<Output = Result<String>> + Send;

    fn set_name(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Observe adapter power state changes.
    fn state_changes(&self) -> impl Future<Output = Result<Subscription<AdapterState>>> + Send;
}

/// A complete Bluetooth stack.
pub trait Platform: Transport + BondBackend + PairingBackend + AdapterBackend {}

impl<T> Platform for T where T: Transport + BondBackend + PairingBackend + AdapterBackend {}
