//! # autoupdate
//!
//! Server-side core of an autoupdate service: many long-lived clients
//! each declare a dynamic set of keys they want to observe in a shared
//! key/value datastore, and every client receives only the values it is
//! permitted to see and that actually changed since its previous
//! delivery.
//!
//! ## Architecture
//!
//! ```text
//! request JSON ──► KeysBuilder ──► key set
//!                                     │
//! message bus ──► Topic (cursor log) ─┤
//!                                     ▼
//!                    Connection::next() ──► delta per client
//!                         │    ▲
//!                         ▼    │ last-delivered map
//!                    DataProvider (datastore + restricter)
//! ```
//!
//! HTTP transport, authentication, the datastore client and the message
//! bus stay outside this crate; they plug in through the traits in
//! [`datastore`] and through [`Service::publish`].
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use autoupdate::{AutoupdateConfig, Service};
//! use tokio::sync::watch;
//!
//! let (_shutdown_tx, shutdown_rx) = watch::channel(());
//! let config = AutoupdateConfig::new()?.validate()?;
//! let service = Service::new(data_provider, &config, shutdown_rx);
//!
//! let builder = service.request_builder(uid, r#"{"user/1": {"name": null}}"#).await?;
//! let mut connection = service.connect(uid, builder, 0);
//! while let Ok(delta) = connection.next().await {
//!     // stream delta to the client
//! }
//! ```

pub mod config;
pub mod datastore;
pub mod keysbuilder;

mod connection;
mod errors;
mod key;
mod service;
mod topic;

pub use config::{AutoupdateConfig, ResolverConfig, TopicConfig};
pub use connection::Connection;
pub use datastore::{
    DataProvider, Datastore, KeyValues, Restricter, RestrictedDatastore, UserId,
};
pub use errors::{Error, ProviderError, RequestError, Result};
pub use key::{CollectionId, InvalidKeyError, Key};
pub use keysbuilder::{Body, FieldDescription, Fields, KeysBuilder};
pub use service::Service;
pub use topic::{Notification, Topic};

#[cfg(test)]
mod connection_test;

#[cfg(test)]
pub mod test_utils;
