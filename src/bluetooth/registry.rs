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

//! Table of active connections.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::connection::Session;
use crate::error::{Error, Result};

/// Opaque handle of a registered connection.
///
/// Handles are assigned in increasing order starting at 1 and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    last_id: u32,
    sessions: HashMap<ConnectionId, Arc<Session>>,
}

/// Maps connection ids to their sessions.
///
/// Entries disappear by themselves once their session has been torn down.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a session under a fresh id.
    ///
    /// Fails once the id space is exhausted.
    pub fn register(self: &Arc<Self>, session: Arc<Session>) -> Result<ConnectionId> {
        let id = {
            let mut inner = self.inner.lock();
            let next = inner
                .last_id
                .checked_add(1)
                .ok_or_else(|| Error::Logic("connection ids exhausted".to_string()))?;
            inner.last_id = next;
            let id = ConnectionId(next);
            inner.sessions.insert(id, session.clone());
            id
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            session.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_same(id, &session);
            }
        });

        debug!("Registered connection {}", id);
        Ok(id)
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Forget a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if self.inner.lock().sessions.remove(&id).is_some() {
            debug!("Unregistered connection {}", id);
        }
    }

    fn remove_if_same(&self, id: ConnectionId, session: &Arc<Session>) {
        let mut inner = self.inner.lock();
        let same = inner
            .sessions
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if same {
            inner.sessions.remove(&id);
            debug!("Connection {} torn down", id);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.lock().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Disconnect every registered session and clear the table.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<_> = self.inner.lock().sessions.values().cloned().collect();
        if sessions.is_empty() {
            return;
        }

        debug!("Disconnecting {} connections", sessions.len());
        futures::future::join_all(sessions.iter().map(|session| session.disconnect())).await;

        let mut inner = self.inner.lock();
        inner
            .sessions
            .retain(|_, current| !sessions.iter().any(|s| Arc::ptr_eq(s, current)));
    }
}
