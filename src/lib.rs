//! Subscriber sync lib, keeps an opensearch index in step with a mongodb subscriber collection.
//!
//! Two syncers do the work: [Backfiller] copies every existing document once, and
//! [ChangeStreamConsumer] follows the collection change stream afterwards.  Both write
//! through a [Projector], which turns a raw subscriber document into an [IndexedSubscriber].
//!
//! [SyncService] wires everything up from a [SyncConfig].
//!
//! # SyncService example:
//! ```no_run
//! use subscriber_sync::{shutdown, Mode, SyncConfig, SyncService};
//!
//! let conf = SyncConfig::load(None).unwrap();
//! let (trigger, listener) = shutdown::channel();
//! trigger.install_signal_handlers().unwrap();
//! let service = SyncService::connect(conf).unwrap();
//! service.run(Mode::Full, listener).unwrap();
//! ```
//!
//! # Backfiller example:
//! ```no_run
//! use std::sync::Arc;
//! use subscriber_sync::{Backfiller, MongoStore, OpenSearchClient, Projector, SyncConfig};
//!
//! let conf = SyncConfig::default();
//! let store = MongoStore::new("mongodb://localhost:27017/sdrms?replicaSet=sdrms-rs", None, "subscribers").unwrap();
//! let index = OpenSearchClient::new(conf.search()).unwrap();
//! let backfiller = Backfiller::new(Arc::new(store), Projector::new(Arc::new(index), "subscribers"));
//! backfiller.run(100).unwrap();
//! ```

pub mod backfill;
pub mod checkpoint;
mod config;
pub mod consumer;
mod error;
pub mod event;
pub mod logging;
pub mod projector;
pub mod retry;
pub mod schema;
pub mod search;
mod service;
pub mod shutdown;
pub mod store;

/// document id key name.
const ID_KEY: &str = "_id";
/// mongoose version key, never indexed.
const VERSION_KEY: &str = "__v";
/// database used when neither config nor uri names one.
const DEFAULT_DB_NAME: &str = "sdrms";

pub use backfill::{BackfillReport, Backfiller};
pub use checkpoint::{MongoResumeStore, ResumeStore};
pub use config::{DetailSyncConf, LogConf, SearchConf, SourceConf, SyncConfig};
pub use consumer::{ChangeStreamConsumer, ConsumerState, ConsumerStats};
pub use error::{Result, SyncError};
pub use event::{ChangeEvent, Operation, ResumePosition};
pub use projector::{IndexedSubscriber, Projector};
pub use retry::{DeadLetters, RetryPolicy};
pub use schema::{
    ensure_index, subscriber_mapping, unified_dataset_mapping, FieldType, MappingProfile, MappingSpec,
};
pub use search::{BulkResponse, DeleteOutcome, OpenSearchClient, SearchIndex};
pub use service::{Mode, SyncService};
pub use store::{ChangeFeed, DocumentStore, MongoStore};
