//! Per-client delta engine.
//!
//! A [`Connection`] owns everything one client needs between deliveries:
//! the resolved key set, the topic cursor and the map of last-delivered
//! values. [`Connection::next`] blocks until something the client
//! observes has genuinely changed and returns only that delta, with
//! `None` values marking keys that became invisible.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;
use tracing::trace;

use crate::datastore::{DataProvider, KeyValues, UserId};
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::keysbuilder::KeysBuilder;
use crate::topic::{Notification, Topic};

/// One client's view of the autoupdate stream.
///
/// Obtained from [`Service::connect`](crate::Service::connect). A
/// connection is driven by exactly one task; `next` takes `&mut self`.
pub struct Connection {
    data_provider: Arc<dyn DataProvider>,
    topic: Arc<Topic>,
    shutdown: watch::Receiver<()>,
    uid: UserId,
    builder: KeysBuilder,
    cursor: u64,
    last: HashMap<Key, Bytes>,
    first_call: bool,
    errored: bool,
    live: Arc<AtomicUsize>,
}

impl Connection {
    pub(crate) fn new(
        data_provider: Arc<dyn DataProvider>,
        topic: Arc<Topic>,
        shutdown: watch::Receiver<()>,
        uid: UserId,
        builder: KeysBuilder,
        cursor: u64,
        live: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            data_provider,
            topic,
            shutdown,
            uid,
            builder,
            cursor,
            last: HashMap::new(),
            first_call: true,
            errored: false,
            live,
        }
    }

    /// Blocks until the next delivery is ready and returns it.
    ///
    /// The first successful call returns all currently visible keys.
    /// Every later call returns only keys whose restricted value changed
    /// since the previous delivery; a `None` value means the key is no
    /// longer visible. Notifications that change nothing the client can
    /// see are swallowed and the call keeps blocking.
    ///
    /// On error `last` and the cursor are untouched, so calling `next`
    /// again retries the same work.
    pub async fn next(&mut self) -> Result<KeyValues> {
        if self.closed() {
            return Err(Error::Closed);
        }

        if self.errored {
            self.builder.update().await?;
            self.errored = false;
            self.first_call = true;
            self.last.clear();
            let cursor = self.topic.current();
            return self.resend_all(cursor).await;
        }

        if self.first_call {
            let cursor = if self.cursor == 0 {
                self.topic.current()
            } else {
                self.cursor
            };
            return self.resend_all(cursor).await;
        }

        loop {
            match self.topic.subscribe(self.cursor).await? {
                Notification::CursorLost { cursor } => {
                    debug!(uid = self.uid, "cursor lost, resending all keys");
                    self.last.clear();
                    return self.resend_all(cursor).await;
                }
                Notification::Changed { cursor, keys } => {
                    if let Some(delta) = self.changed_values(cursor, keys).await? {
                        return Ok(delta);
                    }
                }
            }
        }
    }

    fn closed(&self) -> bool {
        self.shutdown.has_changed().unwrap_or(true)
    }

    /// Loads every observed key and delivers all visible values.
    async fn resend_all(&mut self, cursor: u64) -> Result<KeyValues> {
        let keys = self.builder.keys();
        let data = self
            .data_provider
            .restricted_data(self.uid, keys.clone())
            .await
            .map_err(|source| Error::LoadData { source })?;

        self.last.clear();
        let mut delta = KeyValues::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = data.get(&key).and_then(|value| value.clone()) {
                self.last.insert(key.clone(), value.clone());
                delta.insert(key, Some(value));
            }
        }

        self.cursor = cursor;
        self.first_call = false;
        debug!(uid = self.uid, keys = delta.len(), "full delivery");
        Ok(delta)
    }

    /// Reloads the dirty subset and diffs it against the last delivery.
    /// Returns `None` when nothing the client can see changed.
    async fn changed_values(
        &mut self,
        cursor: u64,
        dirty_keys: Vec<Key>,
    ) -> Result<Option<KeyValues>> {
        let dirty: HashSet<Key> = dirty_keys.into_iter().collect();

        // A dirty relation key can change which keys exist at all.
        let mut rebuilt = false;
        if dirty
            .iter()
            .any(|key| self.builder.relation_keys().contains(key))
        {
            if let Err(err) = self.builder.update().await {
                self.errored = true;
                return Err(err);
            }
            rebuilt = true;
        }

        let keyset: HashSet<Key> = self.builder.keys().into_iter().collect();
        let mut candidate: HashSet<Key> = dirty.intersection(&keyset).cloned().collect();
        if rebuilt {
            for key in &keyset {
                if !self.last.contains_key(key) {
                    candidate.insert(key.clone());
                }
            }
        }

        let mut delta = KeyValues::new();
        if !candidate.is_empty() {
            let data = self
                .data_provider
                .restricted_data(self.uid, candidate.iter().cloned().collect())
                .await
                .map_err(|source| Error::LoadData { source })?;

            for key in candidate {
                match data.get(&key).and_then(|value| value.clone()) {
                    None => {
                        if self.last.remove(&key).is_some() {
                            delta.insert(key, None);
                        }
                    }
                    Some(value) => {
                        let changed = match self.last.get(&key) {
                            Some(old) => *old != value,
                            None => true,
                        };
                        if changed {
                            self.last.insert(key.clone(), value.clone());
                            delta.insert(key, Some(value));
                        }
                    }
                }
            }
        }

        if rebuilt {
            let gone: Vec<Key> = self
                .last
                .keys()
                .filter(|key| !keyset.contains(*key))
                .cloned()
                .collect();
            for key in gone {
                self.last.remove(&key);
                delta.insert(key, None);
            }
        }

        self.cursor = cursor;
        if delta.is_empty() {
            trace!(uid = self.uid, cursor, "notification changed nothing visible");
            Ok(None)
        } else {
            Ok(Some(delta))
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let live = self.live.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(uid = self.uid, live, "connection closed");
    }
}
