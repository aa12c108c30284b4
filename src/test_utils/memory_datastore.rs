//! In-memory data provider with controllable content.
//!
//! Values can be replaced or removed between deliveries, the next call
//! can be forced to fail, and every call is counted so tests can assert
//! that the engine did not reload anything.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::datastore::{DataProvider, KeyValues, UserId};
use crate::errors::ProviderError;
use crate::key::Key;

#[derive(Default)]
pub struct MemoryDatastore {
    data: Mutex<HashMap<Key, Bytes>>,
    fail_next: Mutex<Option<String>>,
    requests: AtomicUsize,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a datastore preloaded with `(key, json value)` pairs.
    pub fn with_data(pairs: &[(&str, &str)]) -> Self {
        let datastore = Self::new();
        for (key, value) in pairs {
            datastore.set(key, value);
        }
        datastore
    }

    /// Sets the raw JSON value of a key.
    pub fn set(&self, key: &str, value: &str) {
        let key: Key = key.parse().expect("invalid key literal in test");
        self.data
            .lock()
            .insert(key, Bytes::copy_from_slice(value.as_bytes()));
    }

    /// Removes a key, making it invisible from now on.
    pub fn remove(&self, key: &str) {
        let key: Key = key.parse().expect("invalid key literal in test");
        self.data.lock().remove(&key);
    }

    /// Makes the next `restricted_data` call fail with `msg`.
    pub fn fail_once(&self, msg: &str) {
        *self.fail_next.lock() = Some(msg.to_string());
    }

    /// Number of `restricted_data` calls so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataProvider for MemoryDatastore {
    async fn restricted_data(
        &self,
        _uid: UserId,
        keys: Vec<Key>,
    ) -> Result<KeyValues, ProviderError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(msg) = self.fail_next.lock().take() {
            return Err(msg.into());
        }

        let data = self.data.lock();
        let mut out = KeyValues::with_capacity(keys.len());
        for key in keys {
            let value = data.get(&key).cloned();
            out.insert(key, value);
        }
        Ok(out)
    }
}
