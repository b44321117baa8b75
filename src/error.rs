//! Error types for each pipeline stage.
//!
//! `UploadError` and `ArchiveError` travel inside `PipelineEvent`s, so they
//! are `Clone + Serialize` and carry rendered messages instead of sources.

use ftpdrop_ftp::{FtpError, FtpErrorKind};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Malformed settings line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum UploadError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Cannot change to remote directory: {0}")]
    ChangeDirectory(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The server refused the file for good (permissions, quota, name).
    #[error("Server refused the upload: {0}")]
    Rejected(String),

    #[error("Cannot read local file: {0}")]
    LocalFile(String),

    #[error("File name cannot be sent over FTP: {0}")]
    InvalidName(String),

    #[error("Upload cancelled: {0}")]
    Cancelled(String),
}

impl UploadError {
    /// Whether another attempt on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Connect(_) | UploadError::Transfer(_))
    }

    /// Map an FTP failure that happened before login completed.
    pub(crate) fn connect(e: FtpError) -> Self {
        match e.kind {
            FtpErrorKind::AuthFailed => UploadError::Auth(e.to_string()),
            _ => UploadError::Connect(e.to_string()),
        }
    }

    pub(crate) fn login(e: FtpError) -> Self {
        match e.kind {
            FtpErrorKind::AuthFailed | FtpErrorKind::CommandRejected => {
                UploadError::Auth(e.to_string())
            }
            // Control connection lost mid-login.
            _ => UploadError::Connect(e.to_string()),
        }
    }

    /// Map a failure after login. Only failures a new session could get
    /// past stay retryable.
    pub(crate) fn transfer(e: FtpError) -> Self {
        if e.is_transient() {
            UploadError::Transfer(e.to_string())
        } else {
            UploadError::Rejected(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArchiveError {
    #[error("Archive directory {path} does not exist")]
    DestinationMissing { path: PathBuf },

    #[error("Uploaded file {path} is gone")]
    SourceMissing { path: PathBuf },

    #[error("Archiving {path} failed: {message}")]
    Io { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot watch {path}: {message}")]
    MonitorStart { path: PathBuf, message: String },

    #[error("Monitor did not stop within {0:?}")]
    MonitorStopTimeout(std::time::Duration),

    #[error("Monitor has already been stopped and cannot be restarted")]
    MonitorConsumed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
