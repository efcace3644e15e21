//! Service bootstrap: connect both sides, prepare the index, backfill, then follow changes.
use crate::backfill::Backfiller;
use crate::checkpoint::{MongoResumeStore, ResumeStore};
use crate::config::SyncConfig;
use crate::consumer::ChangeStreamConsumer;
use crate::error::{Result, SyncError};
use crate::projector::Projector;
use crate::retry::RetryPolicy;
use crate::schema::ensure_index;
use crate::search::{OpenSearchClient, SearchIndex};
use crate::shutdown::ShutdownListener;
use crate::store::{DocumentStore, MongoStore};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

/// What the service does after preparing the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// backfill when enabled in config, then stream.
    Full,
    /// backfill once and exit.
    Backfill,
    /// stream only.
    Stream,
}

impl FromStr for Mode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Mode> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Mode::Full),
            "backfill" => Ok(Mode::Backfill),
            "stream" => Ok(Mode::Stream),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown mode {:?}, expect one of full, backfill, stream",
                other
            ))),
        }
    }
}

pub struct SyncService {
    conf: SyncConfig,
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn SearchIndex>,
    resume_store: Option<Arc<dyn ResumeStore>>,
}

impl SyncService {
    /// Build mongodb and opensearch clients from `conf`.
    pub fn connect(conf: SyncConfig) -> Result<SyncService> {
        conf.validate()?;
        let source = conf.source();
        let mongo = MongoStore::new(source.uri(), source.database(), source.collection())?;
        let resume_store: Option<Arc<dyn ResumeStore>> = if conf.sync().persist_resume_token() {
            let coll = mongo.database().collection(conf.sync().resume_collection());
            Some(Arc::new(MongoResumeStore::new(coll, conf.search().index())))
        } else {
            None
        };
        let index = OpenSearchClient::new(conf.search())?;
        let mut service = SyncService::new(conf, Arc::new(mongo), Arc::new(index));
        service.resume_store = resume_store;
        Ok(service)
    }

    /// Build from ready made clients.
    pub fn new(conf: SyncConfig, store: Arc<dyn DocumentStore>, index: Arc<dyn SearchIndex>) -> Self {
        SyncService {
            conf,
            store,
            index,
            resume_store: None,
        }
    }

    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = Some(store);
        self
    }

    /// Fail fast when either side is unreachable.
    pub fn check_connectivity(&self) -> Result<()> {
        if let Err(e) = self.store.ping() {
            error!(?e, store = %self.store.describe(), "Document store is unreachable");
            return Err(e);
        }
        info!(store = %self.store.describe(), "Document store is reachable");
        if let Err(e) = self.index.ping() {
            error!(?e, url = %self.conf.search().url(), "Search index is unreachable");
            return Err(e);
        }
        info!(url = %self.conf.search().url(), "Search index is reachable");
        Ok(())
    }

    /// Run service in `mode` until done, shutdown or an unrecoverable error.
    pub fn run(&self, mode: Mode, shutdown: ShutdownListener) -> Result<()> {
        self.check_connectivity()?;
        let index_name = self.conf.search().index();
        let profile = self.conf.search().mapping_profile()?;
        if ensure_index(self.index.as_ref(), index_name, &profile.mapping())? {
            info!(index = %index_name, ?profile, "Index created");
        }
        let projector = Projector::new(Arc::clone(&self.index), index_name);

        let backfill = match mode {
            Mode::Full => self.conf.sync().backfill_on_start(),
            Mode::Backfill => true,
            Mode::Stream => false,
        };
        if backfill {
            let synced = Backfiller::new(Arc::clone(&self.store), projector.clone())
                .with_shutdown(shutdown.clone())
                .run(self.conf.sync().batch_size())?;
            info!(synced, "Initial sync done");
        }
        if mode == Mode::Backfill {
            return Ok(());
        }
        if shutdown.is_shutdown() {
            return Ok(());
        }

        let sync_conf = self.conf.sync();
        let mut consumer = ChangeStreamConsumer::new(Arc::clone(&self.store), projector, shutdown)
            .with_retry_policy(RetryPolicy::from(sync_conf))
            .with_reconnect_delay(sync_conf.reconnect_delay())
            .with_max_connect_attempts(sync_conf.max_connect_attempts());
        if let Some(resume_store) = &self.resume_store {
            consumer = consumer.with_resume_store(Arc::clone(resume_store));
        }
        consumer.run()
    }
}
