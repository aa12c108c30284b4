//! Service wiring.
//!
//! [`Service`] owns the change topic and the seams to the datastore and
//! restriction layer, and hands out [`Connection`]s. The message-bus
//! adapter feeds it through [`Service::publish`]; everything else is
//! driven by the per-connection tasks.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::config::{AutoupdateConfig, ResolverConfig};
use crate::connection::Connection;
use crate::datastore::{DataProvider, UserId};
use crate::errors::Result;
use crate::key::Key;
use crate::keysbuilder::KeysBuilder;
use crate::topic::Topic;

/// The autoupdate orchestrator.
///
/// Closing the `shutdown` channel passed to [`Service::new`] wakes every
/// blocked [`Connection::next`] with [`Error::Closed`]. Connecting still
/// works afterwards, but the first `next` of such a connection returns
/// the shutdown error.
///
/// [`Error::Closed`]: crate::Error::Closed
pub struct Service {
    data_provider: Arc<dyn DataProvider>,
    topic: Arc<Topic>,
    resolver_config: ResolverConfig,
    shutdown: watch::Receiver<()>,
    live: Arc<AtomicUsize>,
}

impl Service {
    pub fn new(
        data_provider: Arc<dyn DataProvider>,
        config: &AutoupdateConfig,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            topic: Arc::new(Topic::new(config.topic.retention, shutdown.clone())),
            data_provider,
            resolver_config: config.resolver.clone(),
            shutdown,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wires a new per-client connection.
    ///
    /// Pass `cursor = 0` for a fresh client; a client resuming after a
    /// reconnect passes the cursor of its last delivery and gets every
    /// change since, or a full resend when the topic no longer retains
    /// that far back.
    pub fn connect(&self, uid: UserId, builder: KeysBuilder, cursor: u64) -> Connection {
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(uid, live, "new connection");
        Connection::new(
            self.data_provider.clone(),
            self.topic.clone(),
            self.shutdown.clone(),
            uid,
            builder,
            cursor,
            self.live.clone(),
        )
    }

    /// Builds a [`KeysBuilder`] for a single-body JSON request against
    /// this service's data provider.
    pub async fn request_builder(&self, uid: UserId, input: &str) -> Result<KeysBuilder> {
        KeysBuilder::from_json(self.data_provider.clone(), uid, input, &self.resolver_config).await
    }

    /// Builds a [`KeysBuilder`] for a JSON array of request bodies.
    pub async fn request_builder_many(&self, uid: UserId, input: &str) -> Result<KeysBuilder> {
        KeysBuilder::many_from_json(self.data_provider.clone(), uid, input, &self.resolver_config)
            .await
    }

    /// Announces that `keys` may have changed. Entry point for the
    /// message-bus adapter. Returns the assigned cursor.
    pub fn publish(&self, keys: Vec<Key>) -> u64 {
        self.topic.publish(keys)
    }

    /// The newest topic cursor.
    pub fn current_cursor(&self) -> u64 {
        self.topic.current()
    }
}
