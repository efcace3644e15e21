//! Turn subscriber documents into search index writes.
//!
//! The index body is the source document itself, minus `_id` and the `__v` version key.
//! Bson only types are rendered the way the index can search them: ObjectId as hex string,
//! datetime as RFC 3339 string.
use crate::search::{DeleteOutcome, SearchIndex};
use crate::{Result, SyncError, ID_KEY, VERSION_KEY};
use bson::{Bson, Document};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

const FULL_NAME_KEY: &str = "full_name";
const FIRST_NAME_KEY: &str = "first_name";
const LAST_NAME_KEY: &str = "last_name";

/// Render a document `_id` as index id.
///
/// ObjectId becomes its hex form, strings and integers are used as they are.
pub fn document_id(id: &Bson) -> Option<String> {
    match id {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) if !s.is_empty() => Some(s.clone()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Convert a bson value into json which the search index understands.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => {
            Value::String(dt.to_chrono().to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.clone().into_relaxed_extjson(),
    }
}

/// Document shape stored in the search index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndexedSubscriber(Map<String, Value>);

impl IndexedSubscriber {
    /// Copy every field of `doc` except `_id` and `__v`.
    ///
    /// Documents using separate name parts also get a `full_name`, when they don't carry one.
    pub fn from_document(doc: &Document) -> Self {
        let mut body: Map<String, Value> = doc
            .iter()
            .filter(|(k, _)| k.as_str() != ID_KEY && k.as_str() != VERSION_KEY)
            .map(|(k, v)| (k.clone(), bson_to_json(v)))
            .collect();
        if !body.contains_key(FULL_NAME_KEY) {
            if let Some(name) = joined_name(&body) {
                body.insert(FULL_NAME_KEY.to_string(), Value::String(name));
            }
        }
        IndexedSubscriber(body)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }
}

fn joined_name(body: &Map<String, Value>) -> Option<String> {
    let first = body.get(FIRST_NAME_KEY).and_then(Value::as_str);
    let last = body.get(LAST_NAME_KEY).and_then(Value::as_str);
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
        (None, None) => None,
    }
}

/// Writes projections of single documents into the search index.
#[derive(Clone)]
pub struct Projector {
    index: Arc<dyn SearchIndex>,
    index_name: String,
}

impl Projector {
    pub fn new(index: Arc<dyn SearchIndex>, index_name: &str) -> Self {
        Projector {
            index,
            index_name: index_name.to_string(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn search_index(&self) -> &dyn SearchIndex {
        self.index.as_ref()
    }

    /// Build `(index id, body)` for a whole document, it must carry `_id`.
    pub fn prepare(&self, document: &Document) -> Result<(String, Value)> {
        let id = document
            .get(ID_KEY)
            .and_then(document_id)
            .ok_or(SyncError::MissingId(ID_KEY))?;
        Ok((id, IndexedSubscriber::from_document(document).into_json()))
    }

    /// Index `document` under `id`, replacing what the index held before.
    pub fn project_upsert(&self, id: &Bson, document: &Document) -> Result<String> {
        let id = document_id(id).ok_or(SyncError::MissingId(ID_KEY))?;
        let body = IndexedSubscriber::from_document(document).into_json();
        self.index.index_document(&self.index_name, &id, &body)?;
        info!(%id, index = %self.index_name, "Subscriber indexed");
        Ok(id)
    }

    /// Remove document `id` from the index, an absent id counts as removed.
    pub fn project_delete(&self, id: &Bson) -> Result<DeleteOutcome> {
        let id = document_id(id).ok_or(SyncError::MissingId(ID_KEY))?;
        let outcome = self.index.delete_document(&self.index_name, &id)?;
        match outcome {
            DeleteOutcome::Deleted => info!(%id, index = %self.index_name, "Subscriber deleted from index"),
            DeleteOutcome::NotFound => {
                debug!(%id, index = %self.index_name, "Subscriber not in index, nothing to delete")
            }
        }
        Ok(outcome)
    }
}
