//! The key-graph resolver.
//!
//! A [`KeysBuilder`] turns one or more request bodies into the flat list
//! of datastore keys a client observes. Relation fields make the result
//! data-dependent: the fetched value of `motion/5/tag_ids` decides which
//! `tag/<id>/...` keys exist in the next generation, so resolution runs
//! as a fixpoint over generations of keys.
//!
//! There is one builder per client connection. `update` takes `&mut self`
//! and therefore cannot overlap `keys` for the same owner.

use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::trace;

use crate::config::ResolverConfig;
use crate::datastore::{DataProvider, UserId};
use crate::errors::{Error, RequestError, Result};
use crate::key::{CollectionId, Key};
use crate::keysbuilder::request::{json_type, Body, FieldDescription, Fields};

/// Resolves a request tree into the flat set of observed keys.
pub struct KeysBuilder {
    data_provider: Arc<dyn DataProvider>,
    uid: UserId,
    bodies: Vec<Body>,
    keys: Vec<Key>,
    relation_keys: HashSet<Key>,
    max_rounds: usize,
}

impl std::fmt::Debug for KeysBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysBuilder")
            .field("uid", &self.uid)
            .field("bodies", &self.bodies)
            .field("keys", &self.keys)
            .field("relation_keys", &self.relation_keys)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

impl KeysBuilder {
    /// Builds from a single JSON body and resolves it once.
    pub async fn from_json(
        data_provider: Arc<dyn DataProvider>,
        uid: UserId,
        input: &str,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let body = Body::from_json(input)?;
        Self::from_bodies(data_provider, uid, vec![body], config).await
    }

    /// Builds from a JSON array of bodies; the key set is the union of
    /// all bodies.
    pub async fn many_from_json(
        data_provider: Arc<dyn DataProvider>,
        uid: UserId,
        input: &str,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let bodies = Body::many_from_json(input)?;
        Self::from_bodies(data_provider, uid, bodies, config).await
    }

    /// Builds from already parsed bodies and resolves them once.
    pub async fn from_bodies(
        data_provider: Arc<dyn DataProvider>,
        uid: UserId,
        bodies: Vec<Body>,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let mut builder = Self {
            data_provider,
            uid,
            bodies,
            keys: Vec::new(),
            relation_keys: HashSet::new(),
            max_rounds: config.max_rounds,
        };
        if let Err(err) = builder.update().await {
            return Err(Error::FirstBuild {
                source: Box::new(err),
            });
        }
        Ok(builder)
    }

    /// Recomputes the key list from the request tree against current
    /// data.
    ///
    /// On error the key list is reset to empty; the next successful call
    /// rebuilds it from scratch.
    pub async fn update(&mut self) -> Result<()> {
        match self.resolve().await {
            Ok((keys, relation_keys)) => {
                self.keys = keys;
                self.relation_keys = relation_keys;
                Ok(())
            }
            Err(err) => {
                self.keys.clear();
                self.relation_keys.clear();
                Err(err)
            }
        }
    }

    /// A snapshot copy of the current key list. The order is unspecified.
    pub fn keys(&self) -> Vec<Key> {
        self.keys.clone()
    }

    /// The keys whose values decide the shape of the key graph. A change
    /// to any of them can add or remove keys on the next [`update`].
    ///
    /// [`update`]: KeysBuilder::update
    pub fn relation_keys(&self) -> &HashSet<Key> {
        &self.relation_keys
    }

    async fn resolve(&self) -> Result<(Vec<Key>, HashSet<Key>)> {
        let mut process: HashMap<Key, Option<&FieldDescription>> = HashMap::new();
        for body in &self.bodies {
            body.seed(&mut process);
        }

        let mut keys = Vec::new();
        let mut relation_keys = HashSet::new();
        let mut processed: HashMap<Key, &FieldDescription> = HashMap::new();
        let mut needed: Vec<Key> = Vec::new();
        let mut rounds = 0usize;

        loop {
            for (key, description) in process.drain() {
                keys.push(key.clone());
                if let Some(description) = description {
                    needed.push(key.clone());
                    relation_keys.insert(key.clone());
                    processed.insert(key, description);
                }
            }

            if needed.is_empty() {
                break;
            }

            rounds += 1;
            if self.max_rounds != 0 && rounds > self.max_rounds {
                return Err(Error::ResolutionOverflow {
                    rounds: self.max_rounds,
                });
            }
            trace!(round = rounds, pending = needed.len(), "expand relation keys");

            let data = self
                .data_provider
                .restricted_data(self.uid, needed.clone())
                .await
                .map_err(|source| Error::LoadKeys { source })?;
            needed.clear();

            for (key, description) in processed.drain() {
                // Absent means the field does not exist or the user may
                // not see it; the subtree is pruned silently.
                let Some(value) = data.get(&key).and_then(|value| value.as_ref()) else {
                    continue;
                };
                description.expand(&key, value, &mut process)?;
            }
        }

        Ok((keys, relation_keys))
    }
}

impl Body {
    fn seed<'a>(&'a self, process: &mut HashMap<Key, Option<&'a FieldDescription>>) {
        for (cid, fields) in &self.collections {
            insert_fields(cid, fields, process);
        }
    }
}

impl FieldDescription {
    /// Parses the fetched value of `key` and inserts the next generation
    /// of keys into `process`.
    fn expand<'a>(
        &'a self,
        key: &Key,
        value: &Bytes,
        process: &mut HashMap<Key, Option<&'a FieldDescription>>,
    ) -> std::result::Result<(), RequestError> {
        match self {
            FieldDescription::Terminal => Ok(()),

            FieldDescription::Relation { collection, fields } => {
                let parsed: Value = serde_json::from_slice(value).map_err(|err| {
                    RequestError::Value {
                        key: key.clone(),
                        got: "malformed json".to_string(),
                        expect: "string".to_string(),
                        source: Some(err),
                    }
                })?;
                let raw = match &parsed {
                    Value::String(raw) => raw,
                    other => {
                        return Err(RequestError::value(key.clone(), json_type(other), "string"))
                    }
                };
                let cid = CollectionId::from_str(raw).map_err(|_| {
                    RequestError::value(key.clone(), format!("`{raw}`"), "collection-id string")
                })?;
                if cid.collection() != collection {
                    return Err(RequestError::value(
                        key.clone(),
                        format!("collection `{}`", cid.collection()),
                        format!("collection `{collection}`"),
                    ));
                }
                insert_fields(&cid, fields, process);
                Ok(())
            }

            FieldDescription::RelationList { collection, fields } => {
                let parsed: Value = serde_json::from_slice(value).map_err(|err| {
                    RequestError::Value {
                        key: key.clone(),
                        got: "malformed json".to_string(),
                        expect: "list".to_string(),
                        source: Some(err),
                    }
                })?;
                let items = match &parsed {
                    Value::Array(items) => items,
                    other => {
                        return Err(RequestError::value(key.clone(), json_type(other), "list"))
                    }
                };
                for item in items {
                    let id = item.as_u64().filter(|id| *id >= 1).ok_or_else(|| {
                        RequestError::value(key.clone(), item.to_string(), "positive number")
                    })?;
                    let cid = CollectionId::from_parts(collection, id);
                    insert_fields(&cid, fields, process);
                }
                Ok(())
            }
        }
    }
}

fn insert_fields<'a>(
    cid: &CollectionId,
    fields: &'a Fields,
    process: &mut HashMap<Key, Option<&'a FieldDescription>>,
) {
    for (name, description) in fields {
        let key = Key::from_parts(cid, name);
        let entry = match description {
            FieldDescription::Terminal => None,
            other => Some(other),
        };
        process.insert(key, entry);
    }
}
