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
//! Handles RFCOMM client connections, the connection registry and bonding.

mod bluez;
mod bonding;
mod connection;
mod platform;
mod registry;
mod subscription;

pub use bluez::{BluezPlatform, BluezResponder};
pub use bonding::{remove_device_bond, BondingWatcher};
pub(crate) use bonding::bond_failure;
pub use connection::{ConnectionEvent, ConnectionState, Session, SessionOptions};
pub use platform::{
    AdapterBackend, AttemptError, BondBackend, PairingBackend, PairingResponder, Platform,
    Transport,
};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use subscription::Subscription;
