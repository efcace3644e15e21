//! subscriber sync configuration, express in toml.
//!
//! Every key is optional, and environment variables override what the file says.
//!
//! Basic configuration file example:
//! ```toml
//! [source]
//! # source db uri, need to be a replica set.
//! uri = "mongodb://localhost:27017/sdrms?replicaSet=sdrms-rs"
//! collection = "subscribers"
//!
//! [search]
//! url = "https://localhost:9200"
//! username = "admin"
//! password = "admin"
//! verify_tls = false
//! index = "subscribers"
//! # subscribers or unified_datasets, picked by index name when absent.
//! mapping = "subscribers"
//!
//! [sync]
//! batch_size = 100
//! persist_resume_token = true
//!
//! [log]
//! level = "info"
//! dir = "logs"
//! ```
use crate::error::{Result, SyncError};
use crate::schema::MappingProfile;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global sync service configuration.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    source: SourceConf,
    #[serde(default)]
    search: SearchConf,
    #[serde(default)]
    sync: DetailSyncConf,
    #[serde(default)]
    log: LogConf,
}

/// Source database configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct SourceConf {
    /// Source database uri, it needs to be replica set, begins with 'mongodb://'
    #[serde(default = "default_mongodb_uri")]
    uri: String,
    /// database name, default to the database named in `uri`.
    #[serde(default)]
    database: Option<String>,
    /// collection to watch.
    #[serde(default = "default_collection")]
    collection: String,
}

/// Search index (opensearch) configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct SearchConf {
    #[serde(default = "default_opensearch_url")]
    url: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// set to false to accept self signed certificates.
    #[serde(default = "default_true")]
    verify_tls: bool,
    #[serde(default = "default_index")]
    index: String,
    /// document model of the index, `subscribers` or `unified_datasets`, default to the one
    /// named like the index.
    #[serde(default)]
    mapping: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
}

/// Detail sync behaviour.
#[derive(Deserialize, Debug, Clone)]
pub struct DetailSyncConf {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_reconnect_delay_secs")]
    reconnect_delay_secs: u64,
    #[serde(default = "default_max_connect_attempts")]
    max_connect_attempts: u32,
    #[serde(default = "default_true")]
    backfill_on_start: bool,
    #[serde(default)]
    persist_resume_token: bool,
    /// which collection the resume token record will be written to.
    #[serde(default = "default_resume_collection")]
    resume_collection: String,
    /// 1 means no retry for a failed projection.
    #[serde(default = "default_retry_attempts")]
    retry_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    retry_max_delay_ms: u64,
}

/// Logger config.
#[derive(Deserialize, Debug, Clone)]
pub struct LogConf {
    #[serde(default = "default_log_level")]
    level: String,
    /// log file directory, if not specified, all log information will be output to stdout.
    #[serde(default)]
    dir: Option<String>,
}

impl SyncConfig {
    /// Load configuration from an optional toml file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
        let mut conf = match path {
            Some(p) => SyncConfig::from_toml(&std::fs::read_to_string(p)?)?,
            None => SyncConfig::default(),
        };
        conf.apply_env(|key| std::env::var(key).ok())?;
        conf.validate()?;
        Ok(conf)
    }

    /// Parse configuration from toml text, missing keys take defaults.
    pub fn from_toml(data: &str) -> Result<SyncConfig> {
        Ok(toml::from_str(data)?)
    }

    /// Override values with environment variables looked up by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MONGODB_URI") {
            self.source.uri = v;
        }
        if let Some(v) = lookup("MONGODB_DATABASE") {
            self.source.database = Some(v);
        }
        if let Some(v) = lookup("MONGODB_COLLECTION") {
            self.source.collection = v;
        }
        if let Some(v) = lookup("OPENSEARCH_URL") {
            self.search.url = v;
        }
        if let Some(v) = lookup("OPENSEARCH_USERNAME") {
            self.search.username = Some(v);
        }
        if let Some(v) = lookup("OPENSEARCH_PASSWORD") {
            self.search.password = Some(v);
        }
        if let Some(v) = lookup("OPENSEARCH_VERIFY_TLS") {
            self.search.verify_tls = parse_bool("OPENSEARCH_VERIFY_TLS", &v)?;
        }
        if let Some(v) = lookup("OPENSEARCH_INDEX") {
            self.search.index = v;
        }
        if let Some(v) = lookup("OPENSEARCH_MAPPING") {
            self.search.mapping = Some(v);
        }
        if let Some(v) = lookup("SYNC_BATCH_SIZE") {
            self.sync.batch_size = v.parse().map_err(|_| {
                SyncError::InvalidConfig(format!("SYNC_BATCH_SIZE must be a number, get {:?}", v))
            })?;
        }
        if let Some(v) = lookup("SYNC_BACKFILL_ON_START") {
            self.sync.backfill_on_start = parse_bool("SYNC_BACKFILL_ON_START", &v)?;
        }
        if let Some(v) = lookup("SYNC_PERSIST_RESUME_TOKEN") {
            self.sync.persist_resume_token = parse_bool("SYNC_PERSIST_RESUME_TOKEN", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = lookup("LOG_DIR") {
            self.log.dir = Some(v);
        }
        Ok(())
    }

    /// Reject configuration the service can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.source.uri.is_empty() {
            return Err(SyncError::InvalidConfig("source uri is empty".to_string()));
        }
        if self.search.url.is_empty() {
            return Err(SyncError::InvalidConfig("search url is empty".to_string()));
        }
        if self.search.index.is_empty() {
            return Err(SyncError::InvalidConfig("index name is empty".to_string()));
        }
        self.search.mapping_profile()?;
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if u32::try_from(self.sync.batch_size).is_err() {
            return Err(SyncError::InvalidConfig(format!(
                "batch_size must not exceed {}",
                u32::MAX
            )));
        }
        if self.sync.max_connect_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connect_attempts must be positive".to_string(),
            ));
        }
        if self.sync.retry_attempts == 0 {
            return Err(SyncError::InvalidConfig("retry_attempts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn source(&self) -> &SourceConf {
        &self.source
    }

    pub fn search(&self) -> &SearchConf {
        &self.search
    }

    pub fn sync(&self) -> &DetailSyncConf {
        &self.sync
    }

    pub fn log(&self) -> &LogConf {
        &self.log
    }

    /// Override the log directory, command line wins over file and environment.
    pub fn set_log_dir(&mut self, dir: String) {
        self.log.dir = Some(dir);
    }
}

impl SourceConf {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl SearchConf {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// basic auth credentials, only when username is given.
    pub fn credentials(&self) -> Option<(&str, Option<&str>)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref()))
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Mapping used when creating the index.
    pub fn mapping_profile(&self) -> Result<MappingProfile> {
        match &self.mapping {
            Some(name) => name.parse(),
            None => Ok(MappingProfile::for_index(&self.index)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DetailSyncConf {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn max_connect_attempts(&self) -> u32 {
        self.max_connect_attempts
    }

    pub fn backfill_on_start(&self) -> bool {
        self.backfill_on_start
    }

    pub fn persist_resume_token(&self) -> bool {
        self.persist_resume_token
    }

    pub fn resume_collection(&self) -> &str {
        &self.resume_collection
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl LogConf {
    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }
}

impl Default for SourceConf {
    fn default() -> Self {
        SourceConf {
            uri: default_mongodb_uri(),
            database: None,
            collection: default_collection(),
        }
    }
}

impl Default for SearchConf {
    fn default() -> Self {
        SearchConf {
            url: default_opensearch_url(),
            username: None,
            password: None,
            verify_tls: true,
            index: default_index(),
            mapping: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for DetailSyncConf {
    fn default() -> Self {
        DetailSyncConf {
            batch_size: default_batch_size(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_connect_attempts: default_max_connect_attempts(),
            backfill_on_start: true,
            persist_resume_token: false,
            resume_collection: default_resume_collection(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LogConf {
    fn default() -> Self {
        LogConf {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::InvalidConfig(format!(
            "{} must be a boolean, get {:?}",
            key, value
        ))),
    }
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017/sdrms?replicaSet=sdrms-rs".to_string()
}

fn default_collection() -> String {
    "subscribers".to_string()
}

fn default_opensearch_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index() -> String {
    "subscribers".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_batch_size() -> usize {
    100
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_connect_attempts() -> u32 {
    10
}

fn default_resume_collection() -> String {
    "sync_resume_token".to_string()
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_initial_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}
