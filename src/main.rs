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

//! Bluetooth Classic serial daemon
//!
//! Usage: bt-classic-serial [connect <address> [uuid]|bond <address>|unbond <address>|bond-state <address>|serve]

use anyhow::{bail, Result};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bt_classic_serial::bluetooth::{BluezPlatform, ConnectionEvent, ConnectionId};
use bt_classic_serial::config::Config;
use bt_classic_serial::pairing::ConfiguredDecider;
use bt_classic_serial::BluetoothClassic;

const USAGE: &str =
    "Usage: bt-classic-serial [connect <address> [uuid]|bond <address>|unbond <address>|bond-state <address>|serve]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bt_classic_serial=info".parse()?),
        )
        .init();

    info!("Starting bt-classic-serial v{}...", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("serve");
    let address = args.get(2).map(|s| s.as_str());

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let platform = BluezPlatform::new(&config.bluetooth).await?;
    let decider = Arc::new(ConfiguredDecider::from(&config.pairing));
    let bluetooth = BluetoothClassic::new(platform, &config.bluetooth, decider);

    match (mode, address) {
        ("connect", Some(address)) => {
            let id = match args.get(3) {
                Some(uuid) => bluetooth.connect_to_service(address, uuid).await?,
                None => bluetooth.connect(address, false).await?,
            };
            bridge(&bluetooth, id).await?;
        }
        ("bond", Some(address)) => {
            if bluetooth.bond_device(address).await? {
                println!("Bonded with {}", address);
            } else {
                println!("Bond with {} not established", address);
            }
        }
        ("unbond", Some(address)) => {
            bluetooth.remove_device_bond(address).await?;
            println!("Removed bond with {}", address);
        }
        ("bond-state", Some(address)) => {
            let state = bluetooth.get_device_bond_state(address).await?;
            println!("{}: {}", address, state.as_str());
        }
        ("serve", _) => serve(&bluetooth, config.pairing.handle_requests).await?,
        _ => {
            println!("Unknown mode: {}", mode);
            println!("{}", USAGE);
            bail!("invalid arguments");
        }
    }

    info!("bt-classic-serial stopped");
    Ok(())
}

/// Copy stdin to the connection and the connection to stdout until either side ends.
async fn bridge(
    bluetooth: &BluetoothClassic<BluezPlatform>,
    id: ConnectionId,
) -> Result<()> {
    let mut stream = bluetooth.read_stream(id)?;
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buffer = vec![0u8; 1024];

    loop {
        tokio::select! {
            event = stream.next_event() => match event {
                Some(ConnectionEvent::Data(chunk)) => {
                    stdout.write_all(&chunk).await?;
                    stdout.flush().await?;
                }
                Some(ConnectionEvent::Disconnected { by_remote }) => {
                    info!("Connection {} closed ({})", id, if by_remote { "remote" } else { "local" });
                    break;
                }
                None => break,
            },
            read = stdin.read(&mut buffer) => match read? {
                0 => {
                    close(bluetooth, id).await;
                    break;
                }
                n => {
                    if let Err(e) = bluetooth.write(id, &buffer[..n]).await {
                        warn!("Write failed: {}", e);
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                close(bluetooth, id).await;
                break;
            }
        }
    }

    Ok(())
}

async fn close(bluetooth: &BluetoothClassic<BluezPlatform>, id: ConnectionId) {
    // The remote may have closed first
    if let Err(e) = bluetooth.disconnect(id).await {
        warn!("Disconnect of connection {} failed: {}", id, e);
    }
}

/// Log adapter state changes and, if configured, answer pairing requests.
async fn serve(bluetooth: &BluetoothClassic<BluezPlatform>, handle_requests: bool) -> Result<()> {
    info!(
        "Adapter {} ({}), state {}",
        bluetooth.get_name().await?,
        bluetooth.get_address().await?,
        bluetooth.get_state().await?.as_str()
    );

    if handle_requests {
        bluetooth.pairing_request_handling_enable().await?;
    }

    let mut states = bluetooth.watch_state().await?;
    info!("Ready.");

    loop {
        tokio::select! {
            state = states.next() => match state {
                Some(state) => info!("Adapter is now {}", state.as_str()),
                None => {
                    error!("Adapter state updates ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    bluetooth.pairing_request_handling_disable();
    Ok(())
}
