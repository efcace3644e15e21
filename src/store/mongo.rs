use super::{ChangeFeed, DocumentCursor, DocumentStore};
use crate::error::{is_resume_rejected, Result, SyncError};
use crate::event::{ChangeEvent, ResumePosition};
use crate::{DEFAULT_DB_NAME, ID_KEY};
use bson::{doc, Bson, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::options::{ChangeStreamOptions, FindOptions, FullDocumentType};
use mongodb::sync::{ChangeStream, Client, Collection, Database};
use std::time::Duration;
use tracing::debug;

/// How long the server may hold a getMore on the change stream before answering empty.
const MAX_AWAIT_TIME: Duration = Duration::from_secs(1);

#[derive(Clone)]
/// A mongodb collection used as document store.
pub struct MongoStore {
    client: Client,
    uri: String,
    db_name: String,
    coll_name: String,
}

impl MongoStore {
    /// create a new store from given `uri`.
    ///
    /// `db_name` falls back to the database named in `uri`, then to `sdrms`.
    pub fn new(uri: &str, db_name: Option<&str>, coll_name: &str) -> Result<MongoStore> {
        let client = Client::with_uri_str(uri)?;
        let db_name = db_name
            .map(|d| d.to_string())
            .or_else(|| database_from_uri(uri))
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        Ok(MongoStore {
            client,
            uri: uri.to_string(),
            db_name,
            coll_name: coll_name.to_string(),
        })
    }

    /// get database to sync.
    pub fn database(&self) -> Database {
        self.client.database(&self.db_name)
    }

    /// get collection to watch.
    pub fn collection(&self) -> Collection<Document> {
        self.database().collection(&self.coll_name)
    }

    /// get underlying mongodb client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl DocumentStore for MongoStore {
    fn ping(&self) -> Result<()> {
        self.database().run_command(doc! {"ping": 1}, None)?;
        Ok(())
    }

    fn watch(&self, resume_after: Option<&ResumePosition>) -> Result<Box<dyn ChangeFeed + '_>> {
        let resume_token = resume_after.map(|p| p.to_token()).transpose()?;
        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .max_await_time(Some(MAX_AWAIT_TIME))
            .resume_after(resume_token)
            .build();
        let stream = self
            .collection()
            .watch(None, options)
            .map_err(classify_stream_error)?;
        debug!(db = %self.db_name, coll = %self.coll_name, "Change stream opened");
        Ok(Box::new(MongoChangeFeed { stream }))
    }

    fn find_by_id(&self, id: &Bson) -> Result<Option<Document>> {
        Ok(self.collection().find_one(doc! {ID_KEY: id.clone()}, None)?)
    }

    fn scan(&self, batch_size: u32) -> Result<DocumentCursor<'_>> {
        let cursor = self.collection().find(
            None,
            FindOptions::builder()
                .sort(doc! {ID_KEY: 1})
                .batch_size(batch_size)
                .build(),
        )?;
        Ok(Box::new(cursor.map(|doc| doc.map_err(SyncError::from))))
    }

    fn describe(&self) -> String {
        format!("{} ({}.{})", self.uri, self.db_name, self.coll_name)
    }
}

struct MongoChangeFeed {
    stream: ChangeStream<ChangeStreamEvent<Document>>,
}

impl ChangeFeed for MongoChangeFeed {
    fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        if !self.stream.is_alive() {
            return Err(SyncError::StreamInterrupted(
                "change stream cursor is closed".to_string(),
            ));
        }
        match self.stream.next_if_any().map_err(classify_stream_error)? {
            Some(event) => Ok(Some(ChangeEvent::from_stream_event(event)?)),
            None => Ok(None),
        }
    }

    fn resume_position(&self) -> Result<Option<ResumePosition>> {
        self.stream
            .resume_token()
            .map(|token| ResumePosition::from_token(&token))
            .transpose()
    }
}

/// get database name from `uri` path, like `mongodb://host:27017/sdrms?replicaSet=rs`.
fn database_from_uri(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("://")?;
    let (_, path) = rest.split_once('/')?;
    let db = path.split('?').next().unwrap_or_default();
    if db.is_empty() {
        None
    } else {
        Some(db.to_string())
    }
}

// a stale token may be reported when opening the stream or on the first getMore.
fn classify_stream_error(err: mongodb::error::Error) -> SyncError {
    if is_resume_rejected(&err) {
        SyncError::ResumeTokenRejected {
            detail: err.to_string(),
        }
    } else {
        SyncError::MongoError(err)
    }
}
