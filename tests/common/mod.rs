//! In-memory document store and search index used by integration tests.
#![allow(dead_code)]

use bson::{doc, Bson, Document};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use subscriber_sync::event::{ChangeEvent, ResumePosition};
use subscriber_sync::projector::document_id;
use subscriber_sync::search::{BulkItemError, BulkResponse, DeleteOutcome, SearchIndex};
use subscriber_sync::shutdown::{self, Shutdown, ShutdownListener};
use subscriber_sync::store::{ChangeFeed, DocumentCursor, DocumentStore};
use subscriber_sync::{Projector, Result, SyncError};

pub const INDEX: &str = "subscribers";

pub fn position(n: u32) -> ResumePosition {
    ResumePosition::new(doc! {"_data": format!("{:08}", n)})
}

pub fn subscriber(id: &str, name: &str, city: &str, status: &str) -> Document {
    doc! {
        "_id": id,
        "__v": 0,
        "subscriber_id": format!("AIRTEL_{}", id),
        "full_name": name,
        "primary_phone": "9876543210",
        "address": {"city": city, "state": "Karnataka"},
        "status": status,
        "is_fraud_flagged": false,
    }
}

/// One thing a change stream session yields.
pub enum Step {
    Event(ChangeEvent),
    /// stream breaks with an interruption.
    Interrupt,
    /// stream reports the resume token as lost.
    RejectToken,
    /// empty poll, after which the stream stands at the given position.
    Idle(ResumePosition),
}

/// What happens on one `watch` call.
pub enum Session {
    Open(Vec<Step>),
    /// like `Open`, but a stream started at the tail reports the given position.
    OpenAt(ResumePosition, Vec<Step>),
    /// opening the stream fails.
    Refuse,
    /// opening the stream fails because resume token is lost.
    RejectToken,
}

/// Document store driven by scripted change stream sessions.
///
/// When the last session runs dry, shutdown is triggered so consumers return.
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Document>>,
    sessions: Mutex<VecDeque<Session>>,
    watched_from: Mutex<Vec<Option<ResumePosition>>>,
    shutdown: Shutdown,
    listener: ShutdownListener,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (shutdown, listener) = shutdown::channel();
        MemoryStore {
            docs: Mutex::new(BTreeMap::new()),
            sessions: Mutex::new(VecDeque::new()),
            watched_from: Mutex::new(vec![]),
            shutdown,
            listener,
        }
    }

    pub fn with_docs(docs: Vec<Document>) -> Self {
        let store = MemoryStore::new();
        for doc in docs {
            store.put(doc);
        }
        store
    }

    pub fn put(&self, doc: Document) {
        let id = doc.get("_id").and_then(document_id).unwrap();
        self.docs.lock().unwrap().insert(id, doc);
    }

    /// Store `doc` under `key` whatever it carries, even no `_id` at all.
    pub fn put_keyed(&self, key: &str, doc: Document) {
        self.docs.lock().unwrap().insert(key.to_string(), doc);
    }

    pub fn remove(&self, id: &str) {
        self.docs.lock().unwrap().remove(id);
    }

    pub fn push_session(&self, session: Session) {
        self.sessions.lock().unwrap().push_back(session);
    }

    pub fn listener(&self) -> ShutdownListener {
        self.listener.clone()
    }

    /// Resume positions passed to every `watch` call, in call order.
    pub fn watched_from(&self) -> Vec<Option<ResumePosition>> {
        self.watched_from.lock().unwrap().clone()
    }
}

impl DocumentStore for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn watch(&self, resume_after: Option<&ResumePosition>) -> Result<Box<dyn ChangeFeed + '_>> {
        self.watched_from.lock().unwrap().push(resume_after.cloned());
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.pop_front();
        let last = sessions.is_empty();
        match session {
            None => {
                self.shutdown.trigger();
                Ok(Box::new(MemoryFeed {
                    steps: VecDeque::new(),
                    last: true,
                    current: resume_after.cloned(),
                    shutdown: self.shutdown.clone(),
                }))
            }
            Some(Session::Refuse) => Err(SyncError::StreamInterrupted(
                "connection refused".to_string(),
            )),
            Some(Session::RejectToken) => Err(SyncError::ResumeTokenRejected {
                detail: "resume point may no longer be in the oplog".to_string(),
            }),
            Some(Session::Open(steps)) => Ok(Box::new(MemoryFeed {
                steps: steps.into_iter().collect(),
                last,
                current: resume_after.cloned(),
                shutdown: self.shutdown.clone(),
            })),
            Some(Session::OpenAt(tail, steps)) => Ok(Box::new(MemoryFeed {
                steps: steps.into_iter().collect(),
                last,
                current: Some(resume_after.cloned().unwrap_or(tail)),
                shutdown: self.shutdown.clone(),
            })),
        }
    }

    fn find_by_id(&self, id: &Bson) -> Result<Option<Document>> {
        let id = document_id(id).ok_or(SyncError::MissingId("_id"))?;
        Ok(self.docs.lock().unwrap().get(&id).cloned())
    }

    fn scan(&self, _batch_size: u32) -> Result<DocumentCursor<'_>> {
        let docs: Vec<Document> = self.docs.lock().unwrap().values().cloned().collect();
        Ok(Box::new(docs.into_iter().map(Ok)))
    }

    fn describe(&self) -> String {
        "memory://subscribers".to_string()
    }
}

struct MemoryFeed {
    steps: VecDeque<Step>,
    last: bool,
    current: Option<ResumePosition>,
    shutdown: Shutdown,
}

impl ChangeFeed for MemoryFeed {
    fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        match self.steps.pop_front() {
            Some(Step::Event(event)) => {
                self.current = Some(event.resume_position.clone());
                Ok(Some(event))
            }
            Some(Step::Idle(position)) => {
                self.current = Some(position);
                Ok(None)
            }
            Some(Step::Interrupt) => Err(SyncError::StreamInterrupted(
                "connection reset by peer".to_string(),
            )),
            Some(Step::RejectToken) => Err(SyncError::ResumeTokenRejected {
                detail: "change stream history lost".to_string(),
            }),
            None if self.last => {
                self.shutdown.trigger();
                Ok(None)
            }
            None => Err(SyncError::StreamInterrupted("session closed".to_string())),
        }
    }

    fn resume_position(&self) -> Result<Option<ResumePosition>> {
        Ok(self.current.clone())
    }
}

/// Search index keeping documents in a map, with injectable failures.
#[derive(Default)]
pub struct MemoryIndex {
    indices: Mutex<HashMap<String, Value>>,
    docs: Mutex<HashMap<String, Value>>,
    bulk_sizes: Mutex<Vec<usize>>,
    bulk_calls: AtomicUsize,
    create_calls: AtomicUsize,
    failing_bulk_calls: Mutex<HashSet<usize>>,
    failing_ids: Mutex<HashMap<String, u32>>,
    shutdown_after: Mutex<Option<(usize, Shutdown)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        MemoryIndex::default()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.indices.lock().unwrap().get(index).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().unwrap().clone()
    }

    /// Make bulk call number `n` (1 based) fail as a whole.
    pub fn fail_bulk_call(&self, n: usize) {
        self.failing_bulk_calls.lock().unwrap().insert(n);
    }

    /// Make the next `times` writes of `id` fail.
    pub fn fail_id(&self, id: &str, times: u32) {
        self.failing_ids.lock().unwrap().insert(id.to_string(), times);
    }

    /// Trigger `shutdown` once bulk call number `n` (1 based) is done.
    pub fn shutdown_after_bulk_call(&self, n: usize, shutdown: Shutdown) {
        *self.shutdown_after.lock().unwrap() = Some((n, shutdown));
    }

    fn take_failure(&self, id: &str) -> bool {
        let mut failing = self.failing_ids.lock().unwrap();
        match failing.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn unavailable(index: &str) -> SyncError {
        SyncError::SearchIndexError {
            index: index.to_string(),
            status: 503,
            body: "{\"error\": \"cluster_block_exception\"}".to_string(),
        }
    }
}

impl SearchIndex for MemoryIndex {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.lock().unwrap().contains_key(index))
    }

    fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.indices
            .lock()
            .unwrap()
            .entry(index.to_string())
            .or_insert_with(|| body.clone());
        Ok(())
    }

    fn index_document(&self, index: &str, id: &str, doc: &Value) -> Result<()> {
        if self.take_failure(id) {
            return Err(MemoryIndex::unavailable(index));
        }
        self.docs.lock().unwrap().insert(id.to_string(), doc.clone());
        Ok(())
    }

    fn delete_document(&self, index: &str, id: &str) -> Result<DeleteOutcome> {
        if self.take_failure(id) {
            return Err(MemoryIndex::unavailable(index));
        }
        match self.docs.lock().unwrap().remove(id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    fn bulk_index(&self, index: &str, docs: &[(String, Value)]) -> Result<BulkResponse> {
        let call = self.bulk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.bulk_sizes.lock().unwrap().push(docs.len());
        if self.failing_bulk_calls.lock().unwrap().contains(&call) {
            return Err(MemoryIndex::unavailable(index));
        }
        let mut failed = vec![];
        for (id, doc) in docs {
            if self.take_failure(id) {
                failed.push(BulkItemError {
                    id: id.clone(),
                    status: 400,
                    reason: serde_json::json!({"type": "mapper_parsing_exception"}),
                });
            } else {
                self.docs.lock().unwrap().insert(id.clone(), doc.clone());
            }
        }
        if let Some((n, shutdown)) = &*self.shutdown_after.lock().unwrap() {
            if *n == call {
                shutdown.trigger();
            }
        }
        Ok(BulkResponse {
            total: docs.len(),
            failed,
        })
    }
}

pub fn projector(index: &Arc<MemoryIndex>) -> Projector {
    Projector::new(Arc::clone(index) as Arc<dyn SearchIndex>, INDEX)
}
