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

//! Adapter and bond state values reported to the host.
//!
//! Raw values match the integers host applications already understand
//! (`10..=13` for adapter power states, `10..=12` for bond states).

/// Adapter power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl AdapterState {
    pub fn as_raw(&self) -> i32 {
        match self {
            AdapterState::Off => 10,
            AdapterState::TurningOn => 11,
            AdapterState::On => 12,
            AdapterState::TurningOff => 13,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Off => "Off",
            AdapterState::TurningOn => "Turning on",
            AdapterState::On => "On",
            AdapterState::TurningOff => "Turning off",
        }
    }

    pub fn from_powered(powered: bool) -> Self {
        if powered {
            AdapterState::On
        } else {
            AdapterState::Off
        }
    }
}

/// Bond state of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
    /// Value outside the known set.
    Unknown(i32),
}

impl BondState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            10 => BondState::None,
            11 => BondState::Bonding,
            12 => BondState::Bonded,
            other => BondState::Unknown(other),
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            BondState::None => 10,
            BondState::Bonding => 11,
            BondState::Bonded => 12,
            BondState::Unknown(raw) => *raw,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BondState::None => "Not bonded",
            BondState::Bonding => "Bonding...",
            BondState::Bonded => "Bonded",
            BondState::Unknown(_) => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bond_state_raw_values() {
        for state in [BondState::None, BondState::Bonding, BondState::Bonded] {
            assert_eq!(BondState::from_raw(state.as_raw()), state);
        }
        assert_eq!(BondState::from_raw(-2147483648), BondState::Unknown(i32::MIN));
        assert_eq!(BondState::Unknown(42).as_str(), "Unknown");
    }

    #[test]
    fn test_adapter_state_from_powered() {
        assert_eq!(AdapterState::from_powered(true).as_raw(), 12);
        assert_eq!(AdapterState::from_powered(false).as_raw(), 10);
    }
}
