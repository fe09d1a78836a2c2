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

//! BlueZ implementation of the platform traits.

use anyhow::Result as AnyResult;
use bluer::agent::{
    Agent, DisplayPasskey, DisplayPinCode, ReqError, ReqResult, RequestAuthorization,
    RequestConfirmation, RequestPasskey, RequestPinCode,
};
use bluer::rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Session};
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::platform::{AdapterBackend, AttemptError, BondBackend, PairingBackend, PairingResponder, Transport};
use super::subscription::Subscription;
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};
use crate::pairing::{PairingEvent, PairingRequest, PairingVariant};
use crate::state::{AdapterState, BondState};

type BondWatchers = Arc<SyncMutex<HashMap<Address, mpsc::UnboundedSender<BondState>>>>;
type PairingSender = mpsc::UnboundedSender<PairingEvent<BluezResponder>>;
type ReqFuture<T> = Pin<Box<dyn Future<Output = ReqResult<T>> + Send>>;

/// Bluetooth stack backed by a BlueZ D-Bus session.
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
    alternate_channel: u8,
    connect_timeout: Duration,
    /// Registered client profiles by service UUID. Held across a connect,
    /// which serializes connection attempts.
    profiles: Mutex<HashMap<Uuid, ProfileHandle>>,
    bonding: Arc<SyncMutex<HashSet<Address>>>,
    bond_watchers: BondWatchers,
}

impl BluezPlatform {
    /// Open a BlueZ session on the configured adapter.
    pub async fn new(config: &BluetoothConfig) -> AnyResult<Self> {
        info!("Initializing Bluetooth...");

        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            alternate_channel: config.alternate_channel,
            connect_timeout: config.connect_timeout(),
            profiles: Mutex::new(HashMap::new()),
            bonding: Arc::new(SyncMutex::new(HashSet::new())),
            bond_watchers: Arc::new(SyncMutex::new(HashMap::new())),
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn connect_profile(
        &self,
        handle: &mut ProfileHandle,
        address: Address,
        service: Uuid,
    ) -> io::Result<Stream> {
        enum First {
            Connected(bluer::Result<()>),
            Accepted(io::Result<Stream>),
        }

        let device = self.adapter.device(address).map_err(io_error)?;

        let accept = accept_from(handle, address);
        tokio::pin!(accept);

        let first = tokio::select! {
            connected = device.connect_profile(&service) => First::Connected(connected),
            accepted = &mut accept => First::Accepted(accepted),
        };

        match first {
            First::Connected(Ok(())) => accept.await,
            First::Connected(Err(e)) => Err(io_error(e)),
            First::Accepted(stream) => stream,
        }
    }

    fn notify_bond_state(watchers: &BondWatchers, address: Address, state: BondState) {
        if let Some(tx) = watchers.lock().get(&address) {
            let _ = tx.send(state);
        }
    }
}

/// Wait for BlueZ to hand over the connection to `address`.
async fn accept_from(handle: &mut ProfileHandle, address: Address) -> io::Result<Stream> {
    while let Some(request) = handle.next().await {
        if request.device() == address {
            return request
                .accept()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()));
        }
        // Dropping an unanswered request rejects it
        debug!("Rejecting unexpected profile connection from {}", request.device());
        drop(request);
    }
    Err(io::Error::new(
        io::ErrorKind::NotConnected,
        "profile unregistered before connection",
    ))
}

fn io_error(err: bluer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

impl Transport for BluezPlatform {
    type Stream = Stream;

    async fn resolve_device(&self, address: Address) -> Result<()> {
        self.adapter.device(address)?;
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        // BlueZ stops a discovery once its owning client releases it; ours
        // are never started here, so only report a foreign one.
        if self.adapter.is_discovering().await? {
            debug!("Adapter {} is discovering on behalf of another client", self.adapter.name());
        }
        Ok(())
    }

    async fn open_service(&self, address: Address, service: Uuid) -> std::result::Result<Stream, AttemptError> {
        let mut profiles = self.profiles.lock().await;

        if !profiles.contains_key(&service) {
            let profile = Profile {
                uuid: service,
                role: Some(Role::Client),
                require_authentication: Some(false),
                require_authorization: Some(false),
                auto_connect: Some(false),
                ..Default::default()
            };
            let handle = self
                .session
                .register_profile(profile)
                .await
                .map_err(|e| AttemptError::SocketUnavailable(io_error(e)))?;
            debug!("Registered client profile {}", service);
            profiles.insert(service, handle);
        }

        let handle = profiles
            .get_mut(&service)
            .ok_or_else(|| AttemptError::SocketUnavailable(io::ErrorKind::NotFound.into()))?;

        match tokio::time::timeout(self.connect_timeout, self.connect_profile(handle, address, service)).await {
            Ok(result) => result.map_err(AttemptError::Connect),
            Err(_) => Err(AttemptError::Connect(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out waiting for profile connection",
            ))),
        }
    }

    async fn open_alternate(&self, address: Address) -> io::Result<Stream> {
        debug!(
            "Connecting to {} on RFCOMM channel {}",
            address, self.alternate_channel
        );
        Stream::connect(SocketAddr::new(address, self.alternate_channel)).await
    }
}

impl BondBackend for BluezPlatform {
    async fn bond_state(&self, address: Address) -> Result<BondState> {
        if self.bonding.lock().contains(&address) {
            return Ok(BondState::Bonding);
        }
        let device = self.adapter.device(address)?;
        Ok(if device.is_paired().await? {
            BondState::Bonded
        } else {
            BondState::None
        })
    }

    async fn subscribe_bond_state(&self, address: Address) -> Result<Subscription<BondState>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bond_watchers.lock().insert(address, tx);

        let watchers = self.bond_watchers.clone();
        Ok(Subscription::with_cancel(rx, move || {
            watchers.lock().remove(&address);
        }))
    }

    async fn create_bond(&self, address: Address) -> Result<bool> {
        let device = self.adapter.device(address)?;

        if !self.bonding.lock().insert(address) {
            return Ok(false);
        }
        Self::notify_bond_state(&self.bond_watchers, address, BondState::Bonding);

        let bonding = self.bonding.clone();
        let watchers = self.bond_watchers.clone();
        tokio::spawn(async move {
            let state = match device.pair().await {
                Ok(()) => BondState::Bonded,
                Err(e) => {
                    debug!("Pairing with {} ended: {}", address, e);
                    BondState::None
                }
            };
            bonding.lock().remove(&address);
            Self::notify_bond_state(&watchers, address, state);
        });

        Ok(true)
    }

    async fn remove_bond(&self, address: Address) -> Result<bool> {
        self.adapter.remove_device(address).await?;
        Ok(true)
    }
}

impl PairingBackend for BluezPlatform {
    type Responder = BluezResponder;

    async fn intercept_pairing_requests(&self) -> Result<Subscription<PairingEvent<BluezResponder>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.session.register_agent(pairing_agent(tx)).await?;
        debug!("Pairing agent registered");

        Ok(Subscription::with_cancel(rx, move || {
            drop(handle);
            debug!("Pairing agent unregistered");
        }))
    }
}

impl AdapterBackend for BluezPlatform {
    fn is_available(&self) -> bool {
        true
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn state(&self) -> Result<AdapterState> {
        Ok(AdapterState::from_powered(self.adapter.is_powered().await?))
    }

    async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    async fn name(&self) -> Result<String> {
        Ok(self.adapter.alias().await?)
    }

    async fn set_name(&self, name: &str) -> Result<()> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    async fn state_changes(&self) -> Result<Subscription<AdapterState>> {
        let events = self.adapter.events().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    if tx.send(AdapterState::from_powered(powered)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Subscription::with_cancel(rx, move || task.abort()))
    }
}

enum Reply {
    Pin(Option<oneshot::Sender<ReqResult<String>>>),
    Confirm(Option<oneshot::Sender<ReqResult<()>>>),
    /// Passkey entry; never answered with a value.
    Passkey(Option<oneshot::Sender<ReqResult<u32>>>),
    /// Display-only request, already answered.
    None,
}

/// Answers one BlueZ agent request.
pub struct BluezResponder {
    address: Address,
    reply: Reply,
}

impl BluezResponder {
    fn reject(&mut self, err: ReqError) {
        match &mut self.reply {
            Reply::Pin(slot) => {
                if let Some(reply) = slot.take() {
                    let _ = reply.send(Err(err));
                }
            }
            Reply::Confirm(slot) => {
                if let Some(reply) = slot.take() {
                    let _ = reply.send(Err(err));
                }
            }
            Reply::Passkey(slot) => {
                if let Some(reply) = slot.take() {
                    let _ = reply.send(Err(err));
                }
            }
            Reply::None => {}
        }
    }
}

impl PairingResponder for BluezResponder {
    fn set_pin(&mut self, pin: &str) -> Result<()> {
        let Reply::Pin(slot) = &mut self.reply else {
            return Err(Error::invalid_argument("pairing request does not take a PIN"));
        };
        // BlueZ accepts 1 to 16 characters
        if pin.is_empty() || pin.len() > 16 {
            return Err(Error::invalid_argument("PIN must be 1 to 16 characters"));
        }
        let reply = slot
            .take()
            .ok_or_else(|| Error::Logic("pairing request already answered".to_string()))?;
        reply
            .send(Ok(pin.to_string()))
            .map_err(|_| Error::Platform("pairing request no longer pending".to_string()))
    }

    fn set_pairing_confirmation(&mut self, confirm: bool) -> Result<()> {
        let Reply::Confirm(slot) = &mut self.reply else {
            return Err(Error::invalid_argument("pairing request does not take a confirmation"));
        };
        let reply = slot
            .take()
            .ok_or_else(|| Error::Logic("pairing request already answered".to_string()))?;
        let answer = if confirm { Ok(()) } else { Err(ReqError::Rejected) };
        reply
            .send(answer)
            .map_err(|_| Error::Platform("pairing request no longer pending".to_string()))
    }

    fn show_default_ui(&mut self) {
        // No system dialog sits behind the default agent
        info!("No pairing decision for {}; canceling request", self.address);
        self.reject(ReqError::Canceled);
    }

    fn finish(mut self) {
        self.reject(ReqError::Rejected);
    }
}

fn boxed<T, F>(fut: F) -> ReqFuture<T>
where
    F: Future<Output = ReqResult<T>> + Send + 'static,
{
    Box::pin(fut)
}

fn submit(
    tx: &PairingSender,
    address: Address,
    variant: PairingVariant,
    pairing_key: Option<u32>,
    reply: Reply,
) -> ReqResult<()> {
    let event = PairingEvent {
        request: PairingRequest {
            address,
            variant,
            pairing_key,
        },
        responder: BluezResponder { address, reply },
    };
    tx.send(event).map_err(|_| {
        warn!("Pairing request from {} arrived after handling stopped", address);
        ReqError::Rejected
    })
}

/// Passkey entry has no pairing variant of its own and is forwarded as
/// unknown variant 1.
fn request_passkey(tx: PairingSender, device: Address) -> ReqFuture<u32> {
    boxed(async move {
        let (reply, answer) = oneshot::channel();
        submit(
            &tx,
            device,
            PairingVariant::from_raw(1),
            None,
            Reply::Passkey(Some(reply)),
        )?;
        answer.await.unwrap_or(Err(ReqError::Canceled))
    })
}

/// Agent forwarding every BlueZ pairing callback as a [`PairingEvent`].
fn pairing_agent(tx: PairingSender) -> Agent {
    let pin_tx = tx.clone();
    let entry_tx = tx.clone();
    let confirm_tx = tx.clone();
    let consent_tx = tx.clone();
    let passkey_tx = tx.clone();
    let display_tx = tx;

    Agent {
        request_default: true,
        request_pin_code: Some(Box::new(move |req: RequestPinCode| {
            let tx = pin_tx.clone();
            boxed(async move {
                let (reply, answer) = oneshot::channel();
                submit(&tx, req.device, PairingVariant::Pin, None, Reply::Pin(Some(reply)))?;
                answer.await.unwrap_or(Err(ReqError::Canceled))
            })
        })),
        request_passkey: Some(Box::new(move |req: RequestPasskey| {
            request_passkey(entry_tx.clone(), req.device)
        })),
        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            let tx = confirm_tx.clone();
            boxed(async move {
                let (reply, answer) = oneshot::channel();
                submit(
                    &tx,
                    req.device,
                    PairingVariant::PasskeyConfirmation,
                    Some(req.passkey),
                    Reply::Confirm(Some(reply)),
                )?;
                answer.await.unwrap_or(Err(ReqError::Canceled))
            })
        })),
        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            let tx = consent_tx.clone();
            boxed(async move {
                let (reply, answer) = oneshot::channel();
                submit(&tx, req.device, PairingVariant::Consent, None, Reply::Confirm(Some(reply)))?;
                answer.await.unwrap_or(Err(ReqError::Canceled))
            })
        })),
        display_passkey: Some(Box::new(move |req: DisplayPasskey| {
            let tx = passkey_tx.clone();
            boxed(async move {
                submit(
                    &tx,
                    req.device,
                    PairingVariant::LegacyPin(4),
                    Some(req.passkey),
                    Reply::None,
                )
            })
        })),
        display_pin_code: Some(Box::new(move |req: DisplayPinCode| {
            let tx = display_tx.clone();
            boxed(async move {
                submit(
                    &tx,
                    req.device,
                    PairingVariant::LegacyPin(5),
                    req.pincode.parse().ok(),
                    Reply::None,
                )
            })
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Address = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn pin_responder() -> (BluezResponder, oneshot::Receiver<ReqResult<String>>) {
        let (tx, rx) = oneshot::channel();
        let responder = BluezResponder {
            address: ADDR,
            reply: Reply::Pin(Some(tx)),
        };
        (responder, rx)
    }

    #[tokio::test]
    async fn test_pin_reply() {
        let (mut responder, rx) = pin_responder();
        responder.set_pin("1234").unwrap();
        responder.finish();
        assert_eq!(rx.await.unwrap().unwrap(), "1234");
    }

    #[tokio::test]
    async fn test_overlong_pin_is_rejected() {
        let (mut responder, rx) = pin_responder();
        assert!(responder.set_pin("12345678901234567").is_err());
        responder.finish();
        assert!(matches!(rx.await.unwrap(), Err(ReqError::Rejected)));
    }

    #[tokio::test]
    async fn test_default_ui_cancels() {
        let (tx, rx) = oneshot::channel();
        let mut responder = BluezResponder {
            address: ADDR,
            reply: Reply::Confirm(Some(tx)),
        };
        assert!(responder.set_pin("1234").is_err());
        responder.show_default_ui();
        responder.finish();
        assert!(matches!(rx.await.unwrap(), Err(ReqError::Canceled)));
    }

    #[tokio::test]
    async fn test_passkey_entry_is_forwarded_as_unknown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = tokio::spawn(request_passkey(tx, ADDR));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request.variant, PairingVariant::Unknown(1));
        assert_eq!(event.request.address, ADDR);

        let decider = |_request: PairingRequest| async { crate::pairing::PairingAnswer::NoPreference };
        crate::pairing::arbitrate(&decider, event).await;

        assert!(matches!(request.await.unwrap(), Err(ReqError::Rejected)));
    }

    #[tokio::test]
    async fn test_declined_confirmation() {
        let (tx, rx) = oneshot::channel();
        let mut responder = BluezResponder {
            address: ADDR,
            reply: Reply::Confirm(Some(tx)),
        };
        responder.set_pairing_confirmation(false).unwrap();
        responder.finish();
        assert!(matches!(rx.await.unwrap(), Err(ReqError::Rejected)));
    }
}
