//! Wire format of an autoupdate request.
//!
//! A request is a JSON object mapping collection-ids to field
//! descriptions, or a non-empty JSON array of such objects:
//!
//! ```json
//! {
//!     "motion/5": {
//!         "title": null,
//!         "tag_ids": {
//!             "type": "relation-list",
//!             "collection": "tag",
//!             "fields": {"name": null}
//!         }
//!     }
//! }
//! ```
//!
//! `null` marks a plain field. A `relation` field holds one
//! `collection/id` string, a `relation-list` field holds a list of ids;
//! both recurse into the named target collection. Parsing reports the
//! offending field path for every structural mistake, so request authors
//! can fix their request without reading server logs.

use std::collections::HashMap;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;

use crate::errors::RequestError;
use crate::key::{is_ident, CollectionId};

/// Field descriptions of one collection-id, keyed by field name.
pub type Fields = HashMap<String, FieldDescription>;

/// One request body: which fields of which objects to observe.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub(crate) collections: HashMap<CollectionId, Fields>,
}

/// What to do with one requested field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDescription {
    /// Observe the field, no traversal.
    Terminal,
    /// The field value is a `collection/id` string; recurse into it.
    Relation { collection: String, fields: Fields },
    /// The field value is a list of ids in `collection`; recurse into
    /// each.
    RelationList { collection: String, fields: Fields },
}

impl Body {
    /// Parses a single request body.
    pub fn from_json(input: &str) -> Result<Body, RequestError> {
        if input.trim().is_empty() {
            return Err(RequestError::invalid("No data"));
        }
        let value: Value = serde_json::from_str(input)?;
        Body::from_value(&value, "")
    }

    /// Parses a non-empty list of request bodies.
    pub fn many_from_json(input: &str) -> Result<Vec<Body>, RequestError> {
        if input.trim().is_empty() {
            return Err(RequestError::invalid("No data"));
        }
        let value: Value = serde_json::from_str(input)?;
        let items = match &value {
            Value::Array(items) => items,
            other => return Err(wrong_type("", other, "list")),
        };
        if items.is_empty() {
            return Err(RequestError::invalid("No data"));
        }
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| Body::from_value(item, &idx.to_string()))
            .collect()
    }

    fn from_value(value: &Value, path: &str) -> Result<Body, RequestError> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(wrong_type(path, other, "object")),
        };
        if map.is_empty() {
            return Err(RequestError::invalid("No data"));
        }

        let mut collections = HashMap::with_capacity(map.len());
        for (raw_cid, fields_value) in map {
            let cid = CollectionId::from_str(raw_cid).map_err(|_| {
                RequestError::invalid(format!("invalid collection id `{raw_cid}`"))
            })?;
            let fields = parse_fields(fields_value, &join(path, raw_cid))?;
            collections.insert(cid, fields);
        }
        Ok(Body { collections })
    }
}

impl FieldDescription {
    fn from_value(value: &Value, path: &str) -> Result<Self, RequestError> {
        let map = match value {
            Value::Null => return Ok(FieldDescription::Terminal),
            Value::Object(map) => map,
            other => return Err(wrong_type(path, other, "null or object")),
        };

        let kind = match map.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => return Err(wrong_type(&join(path, "type"), other, "string")),
            None => {
                return Err(RequestError::invalid(format!(
                    "missing `type` at field `{path}`"
                )))
            }
        };

        let collection = match map.get("collection") {
            Some(Value::String(name)) if is_ident(name) => name.clone(),
            Some(Value::String(name)) => {
                return Err(RequestError::invalid(format!(
                    "invalid collection name `{name}` at field `{path}`"
                )))
            }
            Some(other) => {
                return Err(wrong_type(&join(path, "collection"), other, "string"))
            }
            None => {
                return Err(RequestError::invalid(format!(
                    "missing `collection` at field `{path}`"
                )))
            }
        };

        let fields = match map.get("fields") {
            Some(value) => parse_fields(value, &join(path, "fields"))?,
            None => {
                return Err(RequestError::invalid(format!(
                    "missing `fields` at field `{path}`"
                )))
            }
        };

        match kind {
            "relation" => Ok(FieldDescription::Relation { collection, fields }),
            "relation-list" => Ok(FieldDescription::RelationList { collection, fields }),
            other => Err(RequestError::invalid(format!(
                "unknown type `{other}` at field `{path}`"
            ))),
        }
    }
}

fn parse_fields(value: &Value, path: &str) -> Result<Fields, RequestError> {
    let map = match value {
        Value::Object(map) => map,
        other => return Err(wrong_type(path, other, "object")),
    };
    if map.is_empty() {
        return Err(RequestError::invalid(format!("no fields at field `{path}`")));
    }

    let mut fields = HashMap::with_capacity(map.len());
    for (name, description) in map {
        if !is_ident(name) {
            return Err(RequestError::invalid(format!(
                "invalid field name `{name}` at field `{path}`"
            )));
        }
        let description = FieldDescription::from_value(description, &join(path, name))?;
        fields.insert(name.clone(), description);
    }
    Ok(fields)
}

fn wrong_type(path: &str, got: &Value, expect: &str) -> RequestError {
    RequestError::invalid(format!(
        "wrong type at field `{path}`. Got {}, expected {expect}",
        json_type(got)
    ))
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.collections.len()))?;
        for (cid, fields) in &self.collections {
            map.serialize_entry(cid.as_str(), fields)?;
        }
        map.end()
    }
}

impl Serialize for FieldDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldDescription::Terminal => serializer.serialize_unit(),
            FieldDescription::Relation { collection, fields } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "relation")?;
                map.serialize_entry("collection", collection)?;
                map.serialize_entry("fields", fields)?;
                map.end()
            }
            FieldDescription::RelationList { collection, fields } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "relation-list")?;
                map.serialize_entry("collection", collection)?;
                map.serialize_entry("fields", fields)?;
                map.end()
            }
        }
    }
}
