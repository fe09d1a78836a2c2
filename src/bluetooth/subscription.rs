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

//! Explicit subscriptions to platform event sources.

use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Receiving end of a platform event source.
///
/// Dropping the subscription (or calling [`Subscription::cancel`]) stops
/// observation and runs the cancellation registered by the producer.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    /// Subscription with nothing to undo on cancellation.
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, cancel: None }
    }

    /// Subscription that runs `cancel` once when it ends.
    pub fn with_cancel(rx: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop observing.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        self.rx.close();
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancel_runs_once() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel::<u8>();

        let counter = cancelled.clone();
        let sub = Subscription::with_cancel(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(tx.send(1).is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel::<u8>();

        let counter = cancelled.clone();
        let mut sub = Subscription::with_cancel(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tx.send(7).unwrap();
        assert_eq!(sub.next().await, Some(7));
        drop(sub);

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
