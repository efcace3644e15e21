//! Durable resume position, so a restarted service continues where it stopped.
use crate::event::ResumePosition;
use crate::Result;
use bson::{doc, Document};
use mongodb::options::UpdateOptions;
use mongodb::sync::Collection;

const TOKEN_KEY: &str = "token";
const UPDATED_AT_KEY: &str = "updated_at";

/// Somewhere to keep the last processed resume position.
pub trait ResumeStore: Send + Sync {
    fn load(&self) -> Result<Option<ResumePosition>>;

    fn save(&self, position: &ResumePosition) -> Result<()>;
}

/// Keep resume position as a single record inside a mongodb collection.
///
/// Record structure:
/// { _id: `index name`, token: `resume token document`, updated_at: `datetime` }
pub struct MongoResumeStore {
    coll: Collection<Document>,
    key: String,
}

impl MongoResumeStore {
    /// `key` tells records apart when several services share one collection, use the index name.
    pub fn new(coll: Collection<Document>, key: &str) -> Self {
        MongoResumeStore {
            coll,
            key: key.to_string(),
        }
    }
}

impl ResumeStore for MongoResumeStore {
    fn load(&self) -> Result<Option<ResumePosition>> {
        let record = self.coll.find_one(doc! {"_id": self.key.as_str()}, None)?;
        match record {
            Some(doc) => Ok(Some(ResumePosition::new(
                doc.get_document(TOKEN_KEY)?.clone(),
            ))),
            None => Ok(None),
        }
    }

    fn save(&self, position: &ResumePosition) -> Result<()> {
        self.coll.update_one(
            doc! {"_id": self.key.as_str()},
            doc! {"$set": {
                TOKEN_KEY: position.as_document().clone(),
                UPDATED_AT_KEY: bson::DateTime::now(),
            }},
            UpdateOptions::builder().upsert(true).build(),
        )?;
        Ok(())
    }
}
