use bson::document::ValueAccessError;
use mongodb::error::{Error as MongoError, ErrorKind};
use std::result::Result as StdResult;
use thiserror::Error;

/// Server error codes meaning the requested resume point is gone.
///
/// 260: InvalidResumeToken, 280: ChangeStreamFatalError, 286: ChangeStreamHistoryLost.
const RESUME_REJECTED_CODES: [i32; 3] = [260, 280, 286];

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Mongodb connection error")]
    MongoError(#[from] MongoError),
    #[error("Access bson value failed")]
    BsonError(#[from] ValueAccessError),
    #[error("Deserialize bson value failed")]
    BsonDeError(#[from] bson::de::Error),
    #[error("Serialize bson value failed")]
    BsonSerError(#[from] bson::ser::Error),
    #[error("Serialize json value failed")]
    JsonError(#[from] serde_json::Error),
    #[error("Search index request failed")]
    HttpError(#[from] reqwest::Error),
    #[error("Search index {index:?} returned status {status}, detailed: {body}")]
    SearchIndexError {
        index: String,
        status: u16,
        body: String,
    },
    #[error("Resume token rejected by document store, detailed: {detail}")]
    ResumeTokenRejected { detail: String },
    #[error("Change stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("Document store {uri:?} unreachable after {attempts} attempts")]
    StoreUnreachable { uri: String, attempts: u32 },
    #[error("Document has no usable `{0}` field")]
    MissingId(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Parse configuration file failed")]
    ConfigError(#[from] toml::de::Error),
    #[error("Install global logger failed")]
    LogInitError(#[from] tracing_subscriber::util::TryInitError),
    #[error("Io error")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// Is this error the document store refusing to resume from our token?
    pub fn is_resume_token_rejected(&self) -> bool {
        match self {
            SyncError::ResumeTokenRejected { .. } => true,
            SyncError::MongoError(e) => is_resume_rejected(e),
            _ => false,
        }
    }
}

pub(crate) fn is_resume_rejected(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Command(err) => RESUME_REJECTED_CODES.contains(&err.code),
        _ => false,
    }
}

pub type Result<T> = StdResult<T, SyncError>;
