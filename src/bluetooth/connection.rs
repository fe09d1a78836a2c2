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

//! Individual RFCOMM connection session.

use bluer::Address;
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::platform::{AttemptError, Transport};
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};
use crate::events::ReadStream;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Events emitted by a session, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Bytes received from the remote device.
    Data(Vec<u8>),
    /// Connection closed. Always the last event of a session.
    Disconnected { by_remote: bool },
}

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Local disconnect requested, teardown pending.
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Open => 0,
            ConnectionState::Closing => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// Tuning for a single session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub read_buffer_size: usize,
    pub disconnect_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&BluetoothConfig::default())
    }
}

impl From<&BluetoothConfig> for SessionOptions {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size.max(1),
            disconnect_grace: config.disconnect_grace(),
        }
    }
}

struct Shared {
    address: Option<Address>,
    state: AtomicU8,
    writer: Mutex<Option<BoxedWriter>>,
    shutdown: Notify,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// One active connection to a remote device.
///
/// The session owns the stream. Its read loop runs on a spawned task from
/// creation until the remote closes the stream or [`Session::disconnect`]
/// is called; the stream halves are released exactly once either way.
pub struct Session {
    shared: Arc<Shared>,
    grace: Duration,
    events: SyncMutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

impl Session {
    /// Connect to `service` on `address` and start the read loop.
    pub async fn connect<T: Transport>(
        transport: &T,
        address: Address,
        service: Uuid,
        options: &SessionOptions,
    ) -> Result<Arc<Self>> {
        transport.resolve_device(address).await.map_err(|e| match e {
            Error::DeviceNotFound(_) => e,
            other => Error::DeviceNotFound(format!("{}: {}", address, other)),
        })?;

        // Discovery slows down connection attempts considerably
        if let Err(e) = transport.cancel_discovery().await {
            debug!("Could not cancel discovery: {}", e);
        }

        let stream = match transport.open_service(address, service).await {
            Ok(stream) => stream,
            Err(AttemptError::SocketUnavailable(e)) => return Err(Error::SocketUnavailable(e)),
            Err(AttemptError::Connect(e)) => {
                warn!(
                    "Connecting to {} (service {}) failed: {}; trying alternate method",
                    address, service, e
                );
                transport
                    .open_alternate(address)
                    .await
                    .map_err(Error::ConnectFailed)?
            }
        };

        info!("Connected to {}", address);
        Ok(Self::start(stream, Some(address), options))
    }

    /// Wrap an established stream and start its read loop.
    pub fn start<S>(stream: S, address: Option<Address>, options: &SessionOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            address,
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            writer: Mutex::new(Some(Box::new(writer))),
            shutdown: Notify::new(),
            closed,
        });

        tokio::spawn(read_loop(
            shared.clone(),
            Box::new(reader),
            event_tx,
            options.read_buffer_size,
        ));

        Arc::new(Self {
            shared,
            grace: options.disconnect_grace,
            events: SyncMutex::new(Some(event_rx)),
        })
    }

    /// Remote device address, when known.
    pub fn address(&self) -> Option<Address> {
        self.shared.address
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Take the event stream of this session (can only be called once).
    pub fn take_read_stream(self: &Arc<Self>) -> Option<ReadStream> {
        let rx = self.events.lock().take()?;
        Some(ReadStream::new(rx, self.clone()))
    }

    /// Write bytes to the remote device.
    ///
    /// Writes are serialized; a failed write leaves the session open.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut writer = self.shared.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;

        let result = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            warn!("Write of {} bytes failed: {}", data.len(), e);
            Error::Write(e)
        })
    }

    /// Close the connection from the local side.
    ///
    /// Idempotent. Returns once the read loop has torn the session down.
    pub async fn disconnect(&self) {
        let requested = self.shared.state.compare_exchange(
            ConnectionState::Open.as_u8(),
            ConnectionState::Closing.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if requested.is_ok() {
            if let Some(writer) = self.shared.writer.lock().await.as_mut() {
                if let Err(e) = writer.flush().await {
                    debug!("Flush before disconnect failed: {}", e);
                }
            }

            tokio::time::sleep(self.grace).await;

            close_writer(&self.shared).await;
            self.shared.shutdown.notify_one();
        }

        self.closed().await;
    }

    /// Wait until the session is fully torn down.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish()
    }
}

async fn close_writer(shared: &Shared) {
    if let Some(mut writer) = shared.writer.lock().await.take() {
        if let Err(e) = writer.shutdown().await {
            debug!("Closing output stream failed: {}", e);
        }
    }
}

/// Read until the remote closes the stream or a local disconnect is requested.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: BoxedReader,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];

    while shared.state() == ConnectionState::Open {
        let read = tokio::select! {
            biased;
            _ = shared.shutdown.notified() => break,
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                debug!("End of stream");
                break;
            }
            Ok(n) => {
                // Consumer may be gone; keep draining the socket regardless
                let _ = event_tx.send(ConnectionEvent::Data(buffer[..n].to_vec()));
            }
            Err(e) => {
                debug!("Read error: {}", e);
                break;
            }
        }
    }

    // Must be decided before the state moves to Closed
    let by_remote = shared.state() == ConnectionState::Open;

    close_writer(&shared).await;
    drop(reader);

    match shared.address {
        Some(address) if by_remote => info!("Connection to {} closed by remote", address),
        Some(address) => info!("Connection to {} closed locally", address),
        None => debug!("Connection closed (by remote: {})", by_remote),
    }
    let _ = event_tx.send(ConnectionEvent::Disconnected { by_remote });

    shared
        .state
        .store(ConnectionState::Closed.as_u8(), Ordering::SeqCst);
    shared.closed.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn options() -> SessionOptions {
        SessionOptions {
            read_buffer_size: 1024,
            disconnect_grace: Duration::from_millis(5),
        }
    }

    fn open() -> (Arc<Session>, ReadStream, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let session = Session::start(local, None, &options());
        let stream = session.take_read_stream().unwrap();
        (session, stream, remote)
    }

    #[tokio::test]
    async fn test_local_disconnect_is_reported_once() {
        let (session, mut stream, _remote) = open();
        assert!(session.is_connected());

        session.disconnect().await;
        assert!(!session.is_connected());
        assert_eq!(session.state(), ConnectionState::Closed);

        session.disconnect().await;

        assert_eq!(
            stream.next_event().await,
            Some(ConnectionEvent::Disconnected { by_remote: false })
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn test_remote_close_is_attributed_to_remote() {
        let (session, mut stream, mut remote) = open();

        remote.write_all(b"bye").await.unwrap();
        drop(remote);

        assert_eq!(stream.next_event().await, Some(ConnectionEvent::Data(b"bye".to_vec())));
        assert_eq!(
            stream.next_event().await,
            Some(ConnectionEvent::Disconnected { by_remote: true })
        );

        session.closed().await;
        assert!(!session.is_connected());

        // Late local disconnect must not produce a second notification
        session.disconnect().await;
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn test_write_reaches_remote() {
        let (session, _stream, mut remote) = open();

        session.write(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x70, 0x69, 0x6E, 0x67]);
    }

    #[tokio::test]
    async fn test_write_after_disconnect_fails() {
        let (session, _stream, _remote) = open();
        session.disconnect().await;

        let err = session.write(b"late").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_chunks_are_bounded_by_buffer_size() {
        let (local, mut remote) = tokio::io::duplex(8192);
        let options = SessionOptions {
            read_buffer_size: 16,
            disconnect_grace: Duration::from_millis(1),
        };
        let session = Session::start(local, None, &options);
        let mut stream = session.take_read_stream().unwrap();

        let payload: Vec<u8> = (0..100u8).collect();
        remote.write_all(&payload).await.unwrap();
        drop(remote);

        let mut received = Vec::new();
        while let Some(event) = stream.next_event().await {
            match event {
                ConnectionEvent::Data(chunk) => {
                    assert!(chunk.len() <= 16);
                    received.extend(chunk);
                }
                ConnectionEvent::Disconnected { by_remote } => {
                    assert!(by_remote);
                    break;
                }
            }
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_read_stream_taken_once() {
        let (session, _stream, _remote) = open();
        assert!(session.take_read_stream().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_disconnects() {
        let (session, mut stream, _remote) = open();

        let a = session.clone();
        let b = session.clone();
        tokio::join!(a.disconnect(), b.disconnect());

        assert_eq!(
            stream.next_event().await,
            Some(ConnectionEvent::Disconnected { by_remote: false })
        );
        assert_eq!(stream.next_event().await, None);
    }
}
