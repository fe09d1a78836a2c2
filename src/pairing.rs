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

//! Pairing request arbitration.
//!
//! While enabled, pairing requests raised by the Bluetooth stack are handed
//! to a [`PairingDecider`] and its answer is applied back to the request.
//! Requests the decider has no answer for go to the system pairing UI.

use bluer::Address;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{PairingBackend, PairingResponder};
use crate::config::PairingConfig;
use crate::error::{Error, Result};

/// Pairing method requested by the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingVariant {
    /// A PIN has to be supplied.
    Pin,
    /// Yes/no on a displayed passkey.
    PasskeyConfirmation,
    /// Plain yes/no.
    Consent,
    /// Passkey or PIN shown for the user to type on the remote device.
    /// Informational only.
    LegacyPin(i32),
    Unknown(i32),
}

impl PairingVariant {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => PairingVariant::Pin,
            2 => PairingVariant::PasskeyConfirmation,
            3 => PairingVariant::Consent,
            4 | 5 => PairingVariant::LegacyPin(raw),
            other => PairingVariant::Unknown(other),
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            PairingVariant::Pin => 0,
            PairingVariant::PasskeyConfirmation => 2,
            PairingVariant::Consent => 3,
            PairingVariant::LegacyPin(raw) | PairingVariant::Unknown(raw) => *raw,
        }
    }
}

/// Pairing request passed to the decider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub address: Address,
    pub variant: PairingVariant,
    /// Key shown to the user, for confirmation and display variants.
    pub pairing_key: Option<u32>,
}

/// Decider's answer to a pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingAnswer {
    /// Leave the request to the system pairing UI.
    NoPreference,
    Pin(String),
    Confirm(bool),
}

/// External party that decides on pairing requests.
pub trait PairingDecider: Send + Sync + 'static {
    fn handle_pairing_request(&self, request: PairingRequest) -> BoxFuture<'static, PairingAnswer>;
}

impl<F, Fut> PairingDecider for F
where
    F: Fn(PairingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PairingAnswer> + Send + 'static,
{
    fn handle_pairing_request(&self, request: PairingRequest) -> BoxFuture<'static, PairingAnswer> {
        Box::pin(self(request))
    }
}

/// Decider answering from the `[pairing]` configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredDecider {
    auto_accept: bool,
    pin: Option<String>,
}

impl From<&PairingConfig> for ConfiguredDecider {
    fn from(config: &PairingConfig) -> Self {
        Self {
            auto_accept: config.auto_accept,
            pin: config.pin.clone(),
        }
    }
}

impl PairingDecider for ConfiguredDecider {
    fn handle_pairing_request(&self, request: PairingRequest) -> BoxFuture<'static, PairingAnswer> {
        let answer = match request.variant {
            PairingVariant::Pin => self
                .pin
                .clone()
                .map_or(PairingAnswer::NoPreference, PairingAnswer::Pin),
            PairingVariant::PasskeyConfirmation | PairingVariant::Consent if self.auto_accept => {
                PairingAnswer::Confirm(true)
            }
            _ => PairingAnswer::NoPreference,
        };
        Box::pin(async move { answer })
    }
}

/// Pairing request intercepted from the Bluetooth stack.
#[derive(Debug)]
pub struct PairingEvent<R> {
    pub request: PairingRequest,
    pub responder: R,
}

/// Run one intercepted request through the decider.
pub async fn arbitrate<R: PairingResponder>(decider: &dyn PairingDecider, event: PairingEvent<R>) {
    let PairingEvent {
        request,
        mut responder,
    } = event;

    debug!(
        "Pairing request (variant {}) incoming from {}",
        request.variant.as_raw(),
        request.address
    );

    match request.variant {
        PairingVariant::Pin => {
            responder.defer();
            match decider.handle_pairing_request(request).await {
                PairingAnswer::Pin(pin) => {
                    debug!("Trying to set PIN for pairing to {}", pin);
                    if let Err(e) = responder.set_pin(&pin) {
                        error!("Setting PIN for pairing failed: {}", e);
                        responder.show_default_ui();
                    }
                }
                _ => {
                    debug!("Manual PIN pairing in progress");
                    responder.show_default_ui();
                }
            }
            responder.finish();
        }
        PairingVariant::PasskeyConfirmation | PairingVariant::Consent => {
            let key = request.pairing_key;
            responder.defer();
            match decider.handle_pairing_request(request).await {
                PairingAnswer::Confirm(confirm) => {
                    debug!("Trying to set pairing confirmation to {} (key: {:?})", confirm, key);
                    if let Err(e) = responder.set_pairing_confirmation(confirm) {
                        error!("Setting pairing confirmation failed: {}", e);
                        responder.show_default_ui();
                    }
                }
                _ => {
                    debug!("Manual passkey confirmation pairing in progress (key: {:?})", key);
                    responder.show_default_ui();
                }
            }
            responder.finish();
        }
        PairingVariant::LegacyPin(_) => {
            // Nothing to feed back; the decider is only informed
            responder.finish();
            let _ = decider.handle_pairing_request(request).await;
        }
        PairingVariant::Unknown(raw) => {
            warn!("Unknown pairing variant: {}", raw);
            responder.finish();
        }
    }
}

/// Enables and disables interception of pairing requests.
pub struct PairingArbitrator {
    decider: Arc<dyn PairingDecider>,
    enabled: AtomicBool,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl PairingArbitrator {
    pub fn new(decider: Arc<dyn PairingDecider>) -> Self {
        Self {
            decider,
            enabled: AtomicBool::new(false),
            dispatch: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start intercepting pairing requests from `backend`.
    pub async fn enable<B: PairingBackend>(&self, backend: &B) -> Result<()> {
        if self
            .enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Logic(
                "pairing request handling is already enabled".to_string(),
            ));
        }

        let mut requests = match backend.intercept_pairing_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                self.enabled.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!("Starting listening for pairing requests to handle");

        let decider = self.decider.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let decider = decider.clone();
                tokio::spawn(async move { arbitrate(decider.as_ref(), event).await });
            }
            debug!("Pairing request source closed");
        });

        if let Some(previous) = self.dispatch.lock().replace(dispatch) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop intercepting pairing requests. Does nothing when not enabled.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.abort();
            info!("Stopped listening for pairing requests to handle");
        }
    }
}

impl Drop for PairingArbitrator {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.get_mut().take() {
            dispatch.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Address = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Defer,
        SetPin(String),
        Confirm(bool),
        DefaultUi,
        Finish,
    }

    struct RecordingResponder {
        calls: Arc<Mutex<Vec<Call>>>,
        fail: bool,
    }

    impl PairingResponder for RecordingResponder {
        fn defer(&mut self) {
            self.calls.lock().push(Call::Defer);
        }

        fn set_pin(&mut self, pin: &str) -> Result<()> {
            self.calls.lock().push(Call::SetPin(pin.to_string()));
            if self.fail {
                return Err(Error::Platform("rejected".to_string()));
            }
            Ok(())
        }

        fn set_pairing_confirmation(&mut self, confirm: bool) -> Result<()> {
            self.calls.lock().push(Call::Confirm(confirm));
            if self.fail {
                return Err(Error::Platform("rejected".to_string()));
            }
            Ok(())
        }

        fn show_default_ui(&mut self) {
            self.calls.lock().push(Call::DefaultUi);
        }

        fn finish(self) {
            self.calls.lock().push(Call::Finish);
        }
    }

    fn pairing_event(variant: PairingVariant, fail: bool) -> (PairingEvent<RecordingResponder>, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let event = PairingEvent {
            request: PairingRequest {
                address: ADDR,
                variant,
                pairing_key: Some(123456),
            },
            responder: RecordingResponder {
                calls: calls.clone(),
                fail,
            },
        };
        (event, calls)
    }

    fn answering(answer: PairingAnswer) -> impl PairingDecider {
        move |_request: PairingRequest| {
            let answer = answer.clone();
            async move { answer }
        }
    }

    #[tokio::test]
    async fn test_pin_answer_is_applied() {
        let (event, calls) = pairing_event(PairingVariant::Pin, false);
        arbitrate(&answering(PairingAnswer::Pin("1234".into())), event).await;

        assert_eq!(
            *calls.lock(),
            vec![Call::Defer, Call::SetPin("1234".into()), Call::Finish]
        );
    }

    #[tokio::test]
    async fn test_pin_without_answer_falls_back_to_default_ui() {
        let (event, calls) = pairing_event(PairingVariant::Pin, false);
        arbitrate(&answering(PairingAnswer::NoPreference), event).await;
        assert_eq!(*calls.lock(), vec![Call::Defer, Call::DefaultUi, Call::Finish]);

        // A non-PIN answer counts as no answer
        let (event, calls) = pairing_event(PairingVariant::Pin, false);
        arbitrate(&answering(PairingAnswer::Confirm(true)), event).await;
        assert_eq!(*calls.lock(), vec![Call::Defer, Call::DefaultUi, Call::Finish]);
    }

    #[tokio::test]
    async fn test_failed_pin_falls_back_to_default_ui() {
        let (event, calls) = pairing_event(PairingVariant::Pin, true);
        arbitrate(&answering(PairingAnswer::Pin("0000".into())), event).await;

        assert_eq!(
            *calls.lock(),
            vec![
                Call::Defer,
                Call::SetPin("0000".into()),
                Call::DefaultUi,
                Call::Finish
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_confirmation_falls_back_to_default_ui() {
        let (event, calls) = pairing_event(PairingVariant::PasskeyConfirmation, true);
        arbitrate(&answering(PairingAnswer::Confirm(true)), event).await;

        assert_eq!(
            *calls.lock(),
            vec![Call::Defer, Call::Confirm(true), Call::DefaultUi, Call::Finish]
        );
    }

    #[tokio::test]
    async fn test_confirmation_receives_key() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = seen.clone();
        let decider = move |request: PairingRequest| {
            *recorder.lock() = Some(request.clone());
            async move { PairingAnswer::Confirm(false) }
        };

        let (event, calls) = pairing_event(PairingVariant::PasskeyConfirmation, false);
        arbitrate(&decider, event).await;

        let request = seen.lock().clone().unwrap();
        assert_eq!(request.variant.as_raw(), 2);
        assert_eq!(request.pairing_key, Some(123456));
        assert_eq!(*calls.lock(), vec![Call::Defer, Call::Confirm(false), Call::Finish]);
    }

    #[tokio::test]
    async fn test_consent_without_boolean_falls_back() {
        let (event, calls) = pairing_event(PairingVariant::Consent, false);
        arbitrate(&answering(PairingAnswer::Pin("1234".into())), event).await;
        assert_eq!(*calls.lock(), vec![Call::Defer, Call::DefaultUi, Call::Finish]);
    }

    #[tokio::test]
    async fn test_legacy_pin_is_notification_only() {
        let asked = Arc::new(Mutex::new(0));
        let counter = asked.clone();
        let decider = move |_request: PairingRequest| {
            *counter.lock() += 1;
            async move { PairingAnswer::Confirm(true) }
        };

        let (event, calls) = pairing_event(PairingVariant::from_raw(5), false);
        arbitrate(&decider, event).await;

        assert_eq!(*asked.lock(), 1);
        assert_eq!(*calls.lock(), vec![Call::Finish]);
    }

    #[tokio::test]
    async fn test_unknown_variant_is_ignored() {
        let (event, calls) = pairing_event(PairingVariant::from_raw(1), false);
        arbitrate(&answering(PairingAnswer::Pin("1234".into())), event).await;
        assert_eq!(*calls.lock(), vec![Call::Finish]);
    }

    /// Backend whose interception channel is driven by the test.
    #[derive(Default)]
    struct ChannelBackend {
        tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<PairingEvent<RecordingResponder>>>>,
        cancelled: Arc<Mutex<usize>>,
    }

    impl PairingBackend for ChannelBackend {
        type Responder = RecordingResponder;

        async fn intercept_pairing_requests(
            &self,
        ) -> Result<crate::bluetooth::Subscription<PairingEvent<RecordingResponder>>> {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            *self.tx.lock() = Some(tx);
            let cancelled = self.cancelled.clone();
            Ok(crate::bluetooth::Subscription::with_cancel(rx, move || {
                *cancelled.lock() += 1;
            }))
        }
    }

    #[tokio::test]
    async fn test_enable_twice_is_a_logic_error() {
        let backend = ChannelBackend::default();
        let arbitrator = PairingArbitrator::new(Arc::new(answering(PairingAnswer::NoPreference)));

        arbitrator.enable(&backend).await.unwrap();
        let err = arbitrator.enable(&backend).await.unwrap_err();
        assert_eq!(err.code(), "logic_error");
        assert!(arbitrator.is_enabled());

        arbitrator.disable();
        arbitrator.disable();
        assert!(!arbitrator.is_enabled());
    }

    #[tokio::test]
    async fn test_enabled_arbitrator_dispatches_events() {
        let backend = ChannelBackend::default();
        let arbitrator = PairingArbitrator::new(Arc::new(answering(PairingAnswer::Pin("4321".into()))));
        arbitrator.enable(&backend).await.unwrap();

        let (event, calls) = pairing_event(PairingVariant::Pin, false);
        backend.tx.lock().as_ref().unwrap().send(event).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !calls.lock().contains(&Call::Finish) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            *calls.lock(),
            vec![Call::Defer, Call::SetPin("4321".into()), Call::Finish]
        );

        arbitrator.disable();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while *backend.cancelled.lock() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_configured_decider() {
        let decider = ConfiguredDecider::from(&PairingConfig {
            handle_requests: true,
            auto_accept: true,
            pin: None,
        });
        let request = |variant| PairingRequest {
            address: ADDR,
            variant,
            pairing_key: None,
        };

        assert_eq!(
            decider.handle_pairing_request(request(PairingVariant::Consent)).await,
            PairingAnswer::Confirm(true)
        );
        assert_eq!(
            decider.handle_pairing_request(request(PairingVariant::Pin)).await,
            PairingAnswer::NoPreference
        );
    }
}
