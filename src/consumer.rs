//! Live synchronization: follow the change stream and project every event into the index.
//!
//! The consumer is a small state machine:
//!
//! `Connecting -> Streaming -> (error) -> Reconnecting -> Connecting ... -> Closed`
//!
//! Events are handled one at a time in arrival order, and the resume position only moves
//! past an event after it was dispatched.  Empty polls move it too, to where the stream
//! already is.  A broken stream is reopened after a fixed delay from the last position.
//! When the document store refuses that position, the consumer starts over from the
//! current tail and logs that some changes were missed.
use crate::checkpoint::ResumeStore;
use crate::error::{Result, SyncError};
use crate::event::{ChangeEvent, Operation, ResumePosition};
use crate::projector::{document_id, Projector};
use crate::retry::{DeadLetters, RetryPolicy};
use crate::shutdown::ShutdownListener;
use crate::store::{ChangeFeed, DocumentStore};
use crate::ID_KEY;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default delay before reopening a broken change stream.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Default number of consecutive failed connections before giving up.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

/// Counters collected while consuming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub events: u64,
    pub upserts: u64,
    pub deletes: u64,
    /// update events whose document was already gone, and collection level events.
    pub skipped: u64,
    pub failures: u64,
    pub reconnects: u64,
}

enum Applied {
    Upserted,
    Deleted,
    /// nothing left to index, a later delete event cleans up.
    Vanished,
    Ignored,
}

pub struct ChangeStreamConsumer {
    store: Arc<dyn DocumentStore>,
    projector: Projector,
    shutdown: ShutdownListener,
    resume_store: Option<Arc<dyn ResumeStore>>,
    retry: RetryPolicy,
    reconnect_delay: Duration,
    max_connect_attempts: u32,
    position: Option<ResumePosition>,
    state: ConsumerState,
    stats: ConsumerStats,
    dead_letters: DeadLetters,
}

impl ChangeStreamConsumer {
    pub fn new(store: Arc<dyn DocumentStore>, projector: Projector, shutdown: ShutdownListener) -> Self {
        ChangeStreamConsumer {
            store,
            projector,
            shutdown,
            resume_store: None,
            retry: RetryPolicy::none(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            position: None,
            state: ConsumerState::Connecting,
            stats: ConsumerStats::default(),
            dead_letters: DeadLetters::default(),
        }
    }

    /// Load the start position from `store`, and save every new position into it.
    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = Some(store);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts.max(1);
        self
    }

    /// Start right after `position` instead of the current tail.
    pub fn with_resume_position(mut self, position: ResumePosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn resume_position(&self) -> Option<&ResumePosition> {
        self.position.as_ref()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Ids whose projection still failed after every retry.
    pub fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }

    /// Consume until shutdown, which returns `Ok(())`.
    ///
    /// Returns [SyncError::StoreUnreachable] once `max_connect_attempts` connections in a row
    /// failed.  A successful connection resets the count.
    pub fn run(&mut self) -> Result<()> {
        self.load_position();
        let mut failures: u32 = 0;

        let result = loop {
            if self.shutdown.is_shutdown() {
                break Ok(());
            }
            self.state = ConsumerState::Connecting;
            let err = match self.stream(&mut failures) {
                Ok(()) => break Ok(()),
                Err(err) => err,
            };

            if err.is_resume_token_rejected() && self.position.is_some() {
                warn!(
                    ?err,
                    "Change stream: resume position rejected, restart from current tail. \
                     Changes made in between are not synced, run a backfill to close the gap"
                );
                self.position = None;
                continue;
            }

            failures += 1;
            if failures >= self.max_connect_attempts {
                error!(?err, attempts = failures, store = %self.store.describe(), "Change stream: giving up");
                break Err(SyncError::StoreUnreachable {
                    uri: self.store.describe(),
                    attempts: failures,
                });
            }
            self.state = ConsumerState::Reconnecting;
            self.stats.reconnects += 1;
            warn!(
                ?err,
                attempt = failures,
                delay = ?self.reconnect_delay,
                "Change stream: error occurred, reconnect after delay"
            );
            if self.shutdown.wait(self.reconnect_delay) {
                break Ok(());
            }
        };

        self.state = ConsumerState::Closed;
        info!(
            events = self.stats.events,
            upserts = self.stats.upserts,
            deletes = self.stats.deletes,
            skipped = self.stats.skipped,
            failures = self.stats.failures,
            reconnects = self.stats.reconnects,
            dead_letters = self.dead_letters.len(),
            "Change stream: consumer closed"
        );
        result
    }

    fn load_position(&mut self) {
        if self.position.is_some() {
            return;
        }
        if let Some(store) = &self.resume_store {
            match store.load() {
                Ok(Some(position)) => {
                    info!("Change stream: resume from saved position");
                    self.position = Some(position);
                }
                Ok(None) => info!("Change stream: no saved position, start from current tail"),
                Err(err) => warn!(?err, "Change stream: load saved position failed, start from current tail"),
            }
        }
    }

    /// One connection: open the stream and consume until shutdown or error.
    fn stream(&mut self, failures: &mut u32) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut feed = store.watch(self.position.as_ref())?;
        *failures = 0;
        self.state = ConsumerState::Streaming;
        info!(
            store = %store.describe(),
            resumed = self.position.is_some(),
            "Change stream: watching for changes"
        );
        // a stream broken before its first event must still resume here, not at a later tail.
        self.follow_feed(feed.as_ref())?;

        while !self.shutdown.is_shutdown() {
            match feed.next_event()? {
                Some(event) => self.process(event),
                None => self.follow_feed(feed.as_ref())?,
            }
        }
        Ok(())
    }

    /// Take over the position reported by `feed`, it's only kept in memory.
    fn follow_feed(&mut self, feed: &dyn ChangeFeed) -> Result<()> {
        if let Some(position) = feed.resume_position()? {
            self.position = Some(position);
        }
        Ok(())
    }

    fn process(&mut self, event: ChangeEvent) {
        self.stats.events += 1;
        let id = event.document_id.as_ref().and_then(document_id);
        debug!(operation = %event.operation, id = ?id, "Change stream: event received");

        let what = format!("{} {}", event.operation, id.as_deref().unwrap_or_default());
        match self.retry.run(&what, || self.apply(&event)) {
            Ok(Applied::Upserted) => self.stats.upserts += 1,
            Ok(Applied::Deleted) => self.stats.deletes += 1,
            Ok(Applied::Vanished) => {
                debug!(id = ?id, "Change stream: document no longer exists, skipped");
                self.stats.skipped += 1;
            }
            Ok(Applied::Ignored) => self.stats.skipped += 1,
            Err(err) => {
                self.stats.failures += 1;
                error!(operation = %event.operation, id = ?id, ?err, "Change stream: projection failed, event skipped");
                if let Some(id) = id {
                    self.dead_letters.push(id);
                }
            }
        }
        self.advance(event.resume_position);
    }

    fn apply(&self, event: &ChangeEvent) -> Result<Applied> {
        match &event.operation {
            Operation::Insert | Operation::Update | Operation::Replace => {
                let id = event.document_id.as_ref().ok_or(SyncError::MissingId(ID_KEY))?;
                let looked_up;
                let document = match &event.full_document {
                    Some(doc) => doc,
                    None => match self.store.find_by_id(id)? {
                        Some(doc) => {
                            looked_up = doc;
                            &looked_up
                        }
                        None => return Ok(Applied::Vanished),
                    },
                };
                self.projector.project_upsert(id, document)?;
                Ok(Applied::Upserted)
            }
            Operation::Delete => {
                let id = event.document_id.as_ref().ok_or(SyncError::MissingId(ID_KEY))?;
                self.projector.project_delete(id)?;
                Ok(Applied::Deleted)
            }
            Operation::Other(op) => {
                warn!(operation = %op, "Change stream: unsupported operation, ignored");
                Ok(Applied::Ignored)
            }
        }
    }

    fn advance(&mut self, position: ResumePosition) {
        if let Some(store) = &self.resume_store {
            if let Err(err) = store.save(&position) {
                warn!(?err, "Change stream: save resume position failed");
            }
        }
        self.position = Some(position);
    }
}
