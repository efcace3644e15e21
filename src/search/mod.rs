//! The search index side of synchronization.
use crate::Result;
use serde_json::Value;

mod opensearch;

pub use opensearch::OpenSearchClient;

/// Result of deleting one document by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// the index doesn't hold this id, which is fine for us.
    NotFound,
}

/// Failure of one action inside a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemError {
    pub id: String,
    pub status: u16,
    pub reason: Value,
}

/// Summary of a bulk request which reached the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    /// how many actions were sent.
    pub total: usize,
    pub failed: Vec<BulkItemError>,
}

impl BulkResponse {
    pub fn succeeded(&self) -> usize {
        self.total.saturating_sub(self.failed.len())
    }
}

/// A secondary, eventually consistent store, documents are keyed by the source id.
pub trait SearchIndex: Send + Sync {
    /// Check that the index server is reachable.
    fn ping(&self) -> Result<()>;

    fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create `index` with `body` (settings and mappings).
    ///
    /// Implementations treat "already exists" as success.
    fn create_index(&self, index: &str, body: &Value) -> Result<()>;

    /// Write `doc` under `id`, fully replacing any previous document.
    fn index_document(&self, index: &str, id: &str, doc: &Value) -> Result<()>;

    fn delete_document(&self, index: &str, id: &str) -> Result<DeleteOutcome>;

    /// Index many `(id, doc)` pairs in one request.
    ///
    /// `Err` means the whole request failed, per item failures are reported in [BulkResponse].
    fn bulk_index(&self, index: &str, docs: &[(String, Value)]) -> Result<BulkResponse>;
}
