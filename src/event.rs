//! Structured change stream event definition.
//!
//! Useful fields of a mongodb change stream event:
//! _id: The resume token of this event. (Document)
//! operationType: insert, update, replace, delete, or a collection level event.
//! documentKey: `{_id: ..}` of the mutated document. (Document)
//! fullDocument: The document after mutation, only when the server provides it. (Document)
use crate::ID_KEY;
use bson::{Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use std::fmt;

use crate::Result;

/// Operation carried by a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Replace,
    Delete,
    /// drop, rename, invalidate and so on, nothing to project.
    Other(String),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Replace => write!(f, "replace"),
            Operation::Delete => write!(f, "delete"),
            Operation::Other(op) => write!(f, "{}", op),
        }
    }
}

impl From<&OperationType> for Operation {
    fn from(op: &OperationType) -> Self {
        match op {
            OperationType::Insert => Operation::Insert,
            OperationType::Update => Operation::Update,
            OperationType::Replace => Operation::Replace,
            OperationType::Delete => Operation::Delete,
            OperationType::Drop => Operation::Other("drop".to_string()),
            OperationType::Rename => Operation::Other("rename".to_string()),
            OperationType::DropDatabase => Operation::Other("dropDatabase".to_string()),
            OperationType::Invalidate => Operation::Other("invalidate".to_string()),
            OperationType::Other(name) => Operation::Other(name.clone()),
            _ => Operation::Other("unknown".to_string()),
        }
    }
}

/// Opaque position in the change stream.
///
/// It wraps the raw token document, so it can be stored anywhere a bson document can.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePosition(Document);

impl ResumePosition {
    pub fn new(token: Document) -> Self {
        ResumePosition(token)
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }

    /// Convert from driver token.
    pub fn from_token(token: &ResumeToken) -> Result<Self> {
        match bson::to_bson(token)? {
            Bson::Document(d) => Ok(ResumePosition(d)),
            other => Ok(ResumePosition(bson::doc! { "_data": other })),
        }
    }

    /// Convert into driver token, which can be passed to `resume_after`.
    pub fn to_token(&self) -> Result<ResumeToken> {
        Ok(bson::from_bson(Bson::Document(self.0.clone()))?)
    }
}

impl From<Document> for ResumePosition {
    fn from(token: Document) -> Self {
        ResumePosition(token)
    }
}

/// One mutation observed on the watched collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    /// `_id` of mutated document, missing for collection level events.
    pub document_id: Option<Bson>,
    pub full_document: Option<Document>,
    pub resume_position: ResumePosition,
}

impl ChangeEvent {
    pub fn insert(document: Document, position: ResumePosition) -> Self {
        ChangeEvent {
            operation: Operation::Insert,
            document_id: document.get(ID_KEY).cloned(),
            full_document: Some(document),
            resume_position: position,
        }
    }

    /// Update event, `document` is None when server only send the update description.
    pub fn update(id: Bson, document: Option<Document>, position: ResumePosition) -> Self {
        ChangeEvent {
            operation: Operation::Update,
            document_id: Some(id),
            full_document: document,
            resume_position: position,
        }
    }

    pub fn replace(document: Document, position: ResumePosition) -> Self {
        ChangeEvent {
            operation: Operation::Replace,
            document_id: document.get(ID_KEY).cloned(),
            full_document: Some(document),
            resume_position: position,
        }
    }

    pub fn delete(id: Bson, position: ResumePosition) -> Self {
        ChangeEvent {
            operation: Operation::Delete,
            document_id: Some(id),
            full_document: None,
            resume_position: position,
        }
    }

    /// Build from driver event.
    pub fn from_stream_event(event: ChangeStreamEvent<Document>) -> Result<Self> {
        let resume_position = ResumePosition::from_token(&event.id)?;
        let document_id = event
            .document_key
            .as_ref()
            .and_then(|key| key.get(ID_KEY).cloned());
        Ok(ChangeEvent {
            operation: Operation::from(&event.operation_type),
            document_id,
            full_document: event.full_document,
            resume_position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_insert_event_takes_id_from_document() {
        let pos = ResumePosition::new(doc! {"_data": "01"});
        let event = ChangeEvent::insert(doc! {"_id": "ATL001", "status": "active"}, pos.clone());
        assert_eq!(event.operation, Operation::Insert);
        assert_eq!(event.document_id, Some(Bson::String("ATL001".to_string())));
        assert_eq!(event.resume_position, pos);
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Replace.to_string(), "replace");
        assert_eq!(Operation::Other("drop".to_string()).to_string(), "drop");
    }

    #[test]
    fn test_operation_from_driver_type_uses_wire_names() {
        assert_eq!(Operation::from(&OperationType::Update), Operation::Update);
        assert_eq!(
            Operation::from(&OperationType::DropDatabase).to_string(),
            "dropDatabase"
        );
        assert_eq!(
            Operation::from(&OperationType::Other("shardCollection".to_string())).to_string(),
            "shardCollection"
        );
    }
}
