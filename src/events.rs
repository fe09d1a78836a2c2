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

//! Delivery of connection events to the host.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::{ConnectionEvent, Session};

/// Inbound side of a connection: data chunks in stream order, terminated by
/// exactly one [`ConnectionEvent::Disconnected`].
///
/// Cancelling the stream, or dropping it while the connection is still
/// open, disconnects the session.
#[derive(Debug)]
pub struct ReadStream {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    session: Arc<Session>,
}

impl ReadStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ConnectionEvent>, session: Arc<Session>) -> Self {
        Self { rx, session }
    }

    /// Session this stream belongs to.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Next event, `None` after the disconnect event has been consumed.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    /// Next data chunk, `None` once the connection is closed.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        match self.rx.recv().await? {
            ConnectionEvent::Data(chunk) => Some(chunk),
            ConnectionEvent::Disconnected { .. } => None,
        }
    }

    /// Stop listening and close the connection.
    pub async fn cancel(self) {
        self.session.disconnect().await;
    }
}

impl Stream for ReadStream {
    type Item = ConnectionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ConnectionEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        if !self.session.is_connected() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = self.session.clone();
                handle.spawn(async move { session.disconnect().await });
            }
            Err(_) => debug!("Read stream dropped outside a runtime; connection left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::SessionOptions;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn options() -> SessionOptions {
        SessionOptions {
            read_buffer_size: 1024,
            disconnect_grace: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_disconnect() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let session = Session::start(local, None, &options());
        let mut stream = session.take_read_stream().unwrap();

        remote.write_all(b"pong").await.unwrap();
        assert_eq!(stream.next_chunk().await, Some(b"pong".to_vec()));

        drop(remote);
        assert_eq!(stream.next_chunk().await, None);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_disconnects() {
        let (local, _remote) = tokio::io::duplex(1024);
        let session = Session::start(local, None, &options());
        let stream = session.take_read_stream().unwrap();

        stream.cancel().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_drop_disconnects() {
        let (local, _remote) = tokio::io::duplex(1024);
        let session = Session::start(local, None, &options());
        drop(session.take_read_stream().unwrap());

        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert!(!session.is_connected());
    }
}
