//! The document store side of synchronization.
//!
//! The service only observes the store: it reads the change feed, looks documents up
//! by id and scans the collection for backfill.  Nothing here writes subscriber data.
use crate::event::{ChangeEvent, ResumePosition};
use crate::Result;
use bson::{Bson, Document};

mod mongo;

pub use mongo::MongoStore;

/// A source of ordered change events for one collection.
pub trait ChangeFeed {
    /// Fetch next event.
    ///
    /// Returns `Ok(None)` when nothing arrived within the server side await time, so callers
    /// get a chance to check for shutdown between polls.
    fn next_event(&mut self) -> Result<Option<ChangeEvent>>;

    /// Where a new feed should resume to miss nothing handed out so far.
    ///
    /// Known right after opening and refreshed by every poll, even an empty one, so it can run
    /// ahead of the last event.  `None` when the server didn't report a position yet.
    fn resume_position(&self) -> Result<Option<ResumePosition>>;
}

/// Cursor over every document of the watched collection.
pub type DocumentCursor<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;

/// The authoritative store holding subscriber records.
pub trait DocumentStore: Send + Sync {
    /// Check that the store is reachable.
    fn ping(&self) -> Result<()>;

    /// Open a change feed with full document lookup for updates.
    ///
    /// Starts right after `resume_after` when given, or at current tail otherwise.
    fn watch(&self, resume_after: Option<&ResumePosition>) -> Result<Box<dyn ChangeFeed + '_>>;

    /// Point lookup by `_id`.
    fn find_by_id(&self, id: &Bson) -> Result<Option<Document>>;

    /// Iterate the whole collection in stable `_id` order.
    fn scan(&self, batch_size: u32) -> Result<DocumentCursor<'_>>;

    /// Where this store lives, only used in logs and errors.
    fn describe(&self) -> String;
}
