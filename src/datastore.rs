//! Seams to the external collaborators.
//!
//! The engine never talks to the datastore service or the permission layer
//! directly. It consumes [`DataProvider`], which combines datastore access
//! and per-user restriction: every requested key maps to its user-visible
//! value, or to `None` when the key is missing, forbidden or nonexistent.
//!
//! Deployments that keep datastore access and restriction separate can
//! compose the two with [`RestrictedDatastore`].
//!
//! Implementations must tolerate concurrent calls from many connections.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use crate::errors::ProviderError;
use crate::key::Key;

/// Integer user id. `0` is the anonymous user.
pub type UserId = u32;

/// Values for a set of keys. `None` means the key is absent for this user.
pub type KeyValues = HashMap<Key, Option<Bytes>>;

/// Reads user-visible values for a list of keys.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Returns the restricted values for `keys` as seen by `uid`.
    ///
    /// A key that is missing, forbidden or nonexistent maps to `None`;
    /// leaving it out of the result entirely is equivalent.
    async fn restricted_data(
        &self,
        uid: UserId,
        keys: Vec<Key>,
    ) -> Result<KeyValues, ProviderError>;
}

/// Raw datastore reads, before any per-user restriction.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, keys: Vec<Key>) -> Result<KeyValues, ProviderError>;
}

/// Projects a raw value into the form visible to one user.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Restricter: Send + Sync {
    /// Returns the projected value, or `None` to hide the key entirely.
    async fn restrict(
        &self,
        uid: UserId,
        key: Key,
        value: Bytes,
    ) -> Result<Option<Bytes>, ProviderError>;
}

/// A [`DataProvider`] built from a raw [`Datastore`] and a [`Restricter`].
pub struct RestrictedDatastore {
    datastore: Arc<dyn Datastore>,
    restricter: Arc<dyn Restricter>,
}

impl RestrictedDatastore {
    pub fn new(datastore: Arc<dyn Datastore>, restricter: Arc<dyn Restricter>) -> Self {
        Self {
            datastore,
            restricter,
        }
    }
}

#[async_trait]
impl DataProvider for RestrictedDatastore {
    async fn restricted_data(
        &self,
        uid: UserId,
        keys: Vec<Key>,
    ) -> Result<KeyValues, ProviderError> {
        let raw = self.datastore.get(keys).await?;
        let mut out = KeyValues::with_capacity(raw.len());
        for (key, value) in raw {
            let visible = match value {
                Some(value) => self.restricter.restrict(uid, key.clone(), value).await?,
                None => None,
            };
            out.insert(key, visible);
        }
        Ok(out)
    }
}
