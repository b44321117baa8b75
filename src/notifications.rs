//! Outcome reporting.
//!
//! The pipeline reports every job through a [`NotificationSink`]. A UI
//! layer implements the trait (or reads [`PipelineEvent`]s from a
//! [`ChannelSink`] / the JSON-lines stream) to show user-visible messages.

use crate::error::{ArchiveError, UploadError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub trait NotificationSink: Send + Sync {
    /// File uploaded and archived at `archived_to`.
    fn on_upload_success(&self, path: &Path, archived_to: &Path);

    /// Upload failed; the file is still in the source folder.
    fn on_upload_failure(&self, path: &Path, error: &UploadError);

    /// Uploaded, but the local move failed.
    fn on_archive_failure(&self, path: &Path, error: &ArchiveError);
}

/// Serializable mirror of the sink callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    UploadSucceeded {
        path: PathBuf,
        archived_to: PathBuf,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UploadFailed {
        path: PathBuf,
        error: UploadError,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ArchiveFailed {
        path: PathBuf,
        error: ArchiveError,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn path(&self) -> &Path {
        match self {
            PipelineEvent::UploadSucceeded { path, .. }
            | PipelineEvent::UploadFailed { path, .. }
            | PipelineEvent::ArchiveFailed { path, .. } => path,
        }
    }
}

/// Writes outcomes to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn on_upload_success(&self, path: &Path, archived_to: &Path) {
        log::info!("Uploaded {} (archived to {})", path.display(), archived_to.display());
    }

    fn on_upload_failure(&self, path: &Path, error: &UploadError) {
        log::error!("Upload of {} failed: {}", path.display(), error);
    }

    fn on_archive_failure(&self, path: &Path, error: &ArchiveError) {
        log::error!("{} was uploaded but not archived: {}", path.display(), error);
    }
}

/// One JSON `PipelineEvent` per line on a writer (stdout by default).
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn emit(&self, event: PipelineEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Cannot serialize pipeline event: {}", e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::warn!("Cannot write pipeline event: {}", e);
        }
    }
}

impl NotificationSink for JsonLinesSink {
    fn on_upload_success(&self, path: &Path, archived_to: &Path) {
        self.emit(PipelineEvent::UploadSucceeded {
            path: path.to_path_buf(),
            archived_to: archived_to.to_path_buf(),
            at: Utc::now(),
        });
    }

    fn on_upload_failure(&self, path: &Path, error: &UploadError) {
        self.emit(PipelineEvent::UploadFailed {
            path: path.to_path_buf(),
            error: error.clone(),
            at: Utc::now(),
        });
    }

    fn on_archive_failure(&self, path: &Path, error: &ArchiveError) {
        self.emit(PipelineEvent::ArchiveFailed {
            path: path.to_path_buf(),
            error: error.clone(),
            at: Utc::now(),
        });
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PipelineEvent) {
        // Receiver dropped: nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl NotificationSink for ChannelSink {
    fn on_upload_success(&self, path: &Path, archived_to: &Path) {
        self.send(PipelineEvent::UploadSucceeded {
            path: path.to_path_buf(),
            archived_to: archived_to.to_path_buf(),
            at: Utc::now(),
        });
    }

    fn on_upload_failure(&self, path: &Path, error: &UploadError) {
        self.send(PipelineEvent::UploadFailed {
            path: path.to_path_buf(),
            error: error.clone(),
            at: Utc::now(),
        });
    }

    fn on_archive_failure(&self, path: &Path, error: &ArchiveError) {
        self.send(PipelineEvent::ArchiveFailed {
            path: path.to_path_buf(),
            error: error.clone(),
            at: Utc::now(),
        });
    }
}
