//! Canonical key and collection-id types.
//!
//! A key names one observable datum in the datastore and always has the
//! shape `collection/id/field`, for example `motion/5/title`. The
//! `collection/id` prefix on its own is a collection-id.
//!
//! Grammar:
//!
//! ```text
//! key    ::= ident "/" digits "/" ident
//! ident  ::= [a-zA-Z][a-zA-Z0-9_]*
//! digits ::= [1-9][0-9]*
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

const KEY_SEP: char = '/';

/// The string did not match the key grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key `{0}`")]
pub struct InvalidKeyError(pub String);

/// A full datastore key: `collection/id/field`.
///
/// Keys are cheap to clone and hash; the canonical string is the only
/// state. Construction always validates the grammar, except for
/// [`Key::from_parts`] whose components have been validated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Joins an already validated collection-id and field name.
    pub fn from_parts(collection_id: &CollectionId, field: &str) -> Self {
        Key(format!("{}{}{}", collection_id.as_str(), KEY_SEP, field))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `collection` component.
    pub fn collection(&self) -> &str {
        match self.0.find(KEY_SEP) {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// The `collection/id` prefix.
    pub fn collection_id(&self) -> CollectionId {
        match self.0.rfind(KEY_SEP) {
            Some(idx) => CollectionId(self.0[..idx].to_string()),
            None => CollectionId(self.0.clone()),
        }
    }

    /// The `field` component.
    pub fn field(&self) -> &str {
        match self.0.rfind(KEY_SEP) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}

impl FromStr for Key {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEP);
        let collection = parts.next().unwrap_or("");
        let id = parts.next().unwrap_or("");
        let field = parts.next().unwrap_or("");
        if parts.next().is_some()
            || !is_ident(collection)
            || !is_id(id)
            || !is_ident(field)
        {
            return Err(InvalidKeyError(s.to_string()));
        }
        Ok(Key(s.to_string()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A `collection/id` pair, the prefix of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(String);

impl CollectionId {
    /// Builds a collection-id from an already validated collection name
    /// and a positive id.
    pub fn from_parts(collection: &str, id: u64) -> Self {
        CollectionId(format!("{collection}{KEY_SEP}{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn collection(&self) -> &str {
        match self.0.find(KEY_SEP) {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn id(&self) -> u64 {
        match self.0.find(KEY_SEP) {
            Some(idx) => self.0[idx + 1..].parse().unwrap_or(0),
            None => 0,
        }
    }
}

impl FromStr for CollectionId {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEP);
        let collection = parts.next().unwrap_or("");
        let id = parts.next().unwrap_or("");
        if parts.next().is_some() || !is_ident(collection) || !is_id(id) {
            return Err(InvalidKeyError(s.to_string()));
        }
        Ok(CollectionId(s.to_string()))
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `[a-zA-Z][a-zA-Z0-9_]*`
pub(crate) fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `[1-9][0-9]*`
pub(crate) fn is_id(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if ('1'..='9').contains(&c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_digit())
}
