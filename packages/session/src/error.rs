//! Error families surfaced by the session.
//!
//! Each family maps to a distinct [`ErrorReport`] so the operator sees a
//! different title for a file problem, a connection problem, a discovery
//! problem and so on.

use tapi::{CorrelationId, SchemaError};

// ---------------------------------------------------------------------------
// Families
// ---------------------------------------------------------------------------

/// Reading a local file failed.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("cannot open {path}: {detail}")]
    NotOpen { path: String, detail: String },

    #[error("cannot read {path}: {detail}")]
    NotRead { path: String, detail: String },

    #[error("cannot parse {path}: {detail}")]
    NotParsed { path: String, detail: String },
}

/// The API server or a database could not be reached or answered badly.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("server returned status {0}")]
    BadStatus(u16),

    #[error("database {database}: {detail}")]
    Database { database: String, detail: String },
}

/// Locating or loading the Swagger document failed.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("documentation index is not available: {0}")]
    SourceNotAvailable(String),

    #[error("documentation index lists no documents")]
    SourceNotParsed,

    #[error("no document was chosen")]
    FileNamesNotExtracted,

    #[error("document could not be downloaded: {0}")]
    FileNotDownloaded(#[source] ConnectionError),

    #[error("document could not be parsed: {0}")]
    FileNotParsed(#[source] SchemaError),
}

/// Credential lookup or record verification could not run.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("database settings are incomplete: {0} is not set")]
    MissingSetting(&'static str),

    #[error("no database connection is configured")]
    NoExecutor,

    #[error("user {0:?} not found")]
    UserNotFound(String),

    #[error("no API key stored for user {0:?}")]
    ApiKeyNotFound(String),

    #[error("no table is known for {0}")]
    UnknownTable(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A request could not be built, sent, or correlated.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("the access token has expired")]
    TokenExpired,

    #[error("no attribute has a value, nothing to send")]
    NothingToSend,

    #[error("no communication with id {0}")]
    UnknownId(CorrelationId),

    #[error("communication {0} was never sent")]
    NotDispatched(CorrelationId),

    #[error("communication {0} has no reply")]
    NoReply(CorrelationId),

    #[error("token reply could not be parsed: {0}")]
    TokenNotParsed(String),

    #[error("general reply is not JSON")]
    ReplyNotParsed,
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Operator-facing description of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub title: &'static str,
    pub summary: String,
    pub detail: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.summary)?;
        if !self.detail.is_empty() {
            write!(f, "\n  {}", self.detail)?;
        }
        Ok(())
    }
}

impl SessionError {
    pub fn report(&self) -> ErrorReport {
        let (title, detail) = match self {
            SessionError::File(e) => ("File error", file_detail(e)),
            SessionError::Connection(e) => ("Connection error", connection_detail(e)),
            SessionError::Discovery(e) => ("Swagger error", discovery_detail(e)),
            SessionError::Verification(e) => ("Database error", verification_detail(e)),
            SessionError::Request(_) => ("Request error", String::new()),
            SessionError::Schema(_) => ("Endpoint list error", String::new()),
        };
        ErrorReport {
            title,
            summary: self.to_string(),
            detail,
        }
    }
}

// --- helpers -----------------------------------------------------------------

fn file_detail(e: &FileError) -> String {
    match e {
        FileError::NotOpen { .. } => "check that the file exists and is readable".into(),
        FileError::NotRead { .. } => "the file could be opened but not read".into(),
        FileError::NotParsed { .. } => "the file is not valid JSON or lacks Configuration.S5Db".into(),
    }
}

fn connection_detail(e: &ConnectionError) -> String {
    match e {
        ConnectionError::Database { detail, .. } => detail.clone(),
        ConnectionError::Http(_) | ConnectionError::BadStatus(_) => {
            "check the server address and port".into()
        }
    }
}

fn discovery_detail(e: &DiscoveryError) -> String {
    match e {
        DiscoveryError::FileNotDownloaded(c) => c.to_string(),
        DiscoveryError::FileNotParsed(s) => s.to_string(),
        _ => String::new(),
    }
}

fn verification_detail(e: &VerificationError) -> String {
    match e {
        VerificationError::Connection(c) => connection_detail(c),
        _ => String::new(),
    }
}
