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

//! Error taxonomy surfaced to the host.

use std::io;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by connection, bonding and pairing operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable Bluetooth adapter.
    #[error("bluetooth is not available: {0}")]
    Unavailable(String),

    /// Malformed or missing input, unknown connection id.
    #[error("{0}")]
    InvalidArgument(String),

    /// The adapter could not resolve the remote device.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The socket for the remote service could not be created.
    #[error("socket connection not established")]
    SocketUnavailable(#[source] io::Error),

    /// Both the primary and the alternate connection strategy failed.
    #[error("failed to connect")]
    ConnectFailed(#[source] io::Error),

    /// Operation on a session that is closing or closed.
    #[error("not connected")]
    NotConnected,

    /// Writing to the remote device failed.
    #[error("write failed")]
    Write(#[source] io::Error),

    #[error("{0}")]
    Bond(String),

    #[error("{0}")]
    NoPermissions(String),

    /// Operation not valid in the current state.
    #[error("{0}")]
    Logic(String),

    /// Any other failure reported by the Bluetooth stack.
    #[error("bluetooth stack error: {0}")]
    Platform(String),
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn bond(msg: impl Into<String>) -> Self {
        Self::Bond(msg.into())
    }

    /// Error identifier reported to the host application.
    pub fn code(&self) -> &'static str {
        match self {
            // Unclassified stack failures mean the adapter could not serve the call
            Error::Unavailable(_) | Error::Platform(_) => "bluetooth_unavailable",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::DeviceNotFound(_) | Error::SocketUnavailable(_) | Error::ConnectFailed(_) => {
                "connect_error"
            }
            Error::NotConnected | Error::Write(_) => "write_error",
            Error::Bond(_) => "bond_error",
            Error::NoPermissions(_) => "no_permissions",
            Error::Logic(_) => "logic_error",
        }
    }
}

impl From<bluer::Error> for Error {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                Error::NoPermissions(err.message)
            }
            bluer::ErrorKind::NotAvailable | bluer::ErrorKind::NotReady => {
                Error::Unavailable(err.message)
            }
            bluer::ErrorKind::DoesNotExist | bluer::ErrorKind::NotFound => {
                Error::DeviceNotFound(err.message)
            }
            bluer::ErrorKind::InvalidArguments | bluer::ErrorKind::InvalidAddress(_) => {
                Error::InvalidArgument(err.message)
            }
            _ => Error::Platform(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failures_share_code() {
        let refused = || io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::DeviceNotFound("x".into()).code(), "connect_error");
        assert_eq!(Error::SocketUnavailable(refused()).code(), "connect_error");
        assert_eq!(Error::ConnectFailed(refused()).code(), "connect_error");
    }

    #[test]
    fn test_host_codes() {
        assert_eq!(Error::invalid_argument("bad").code(), "invalid_argument");
        assert_eq!(Error::NotConnected.code(), "write_error");
        assert_eq!(Error::bond("already bonded").code(), "bond_error");
        assert_eq!(Error::Logic("again".into()).code(), "logic_error");
        assert_eq!(Error::Unavailable("off".into()).code(), "bluetooth_unavailable");
        assert_eq!(Error::NoPermissions("no".into()).code(), "no_permissions");
    }

    #[test]
    fn test_every_code_is_a_host_code() {
        const HOST_CODES: [&str; 7] = [
            "bluetooth_unavailable",
            "invalid_argument",
            "connect_error",
            "write_error",
            "bond_error",
            "no_permissions",
            "logic_error",
        ];
        let io = || io::Error::from(io::ErrorKind::Other);
        let all = [
            Error::Unavailable("x".into()),
            Error::InvalidArgument("x".into()),
            Error::DeviceNotFound("x".into()),
            Error::SocketUnavailable(io()),
            Error::ConnectFailed(io()),
            Error::NotConnected,
            Error::Write(io()),
            Error::Bond("x".into()),
            Error::NoPermissions("x".into()),
            Error::Logic("x".into()),
            Error::Platform("x".into()),
        ];
        for err in all {
            assert!(HOST_CODES.contains(&err.code()), "{} has no host code", err);
        }
    }

    #[test]
    fn test_connect_failed_keeps_cause() {
        use std::error::Error as _;

        let err = Error::ConnectFailed(io::Error::new(io::ErrorKind::TimedOut, "page timeout"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("page timeout".to_string()));
    }
}
