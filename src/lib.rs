//! # ftpdrop
//!
//! Watches a local folder, uploads each newly created file to an FTP
//! server and moves it into an archive folder once the server has
//! confirmed the transfer.
//!
//! - `settings`: `KEY=VALUE` settings file, cached snapshot, atomic save
//! - `uploader`: `FileUploader` seam and the one-session-per-file FTP uploader
//! - `archiver`: collision-free local move into the archive folder
//! - `monitor`: `notify` watch emitting `FileCreated`
//! - `job`: settle, upload with retry, archive, report
//! - `pipeline`: start/stop/restart/toggle, dispatcher and worker pool
//! - `notifications`: outcome sinks for a UI layer
//! - `logging`, `cli`: used by the `ftpdrop` binary

pub mod archiver;
pub mod cli;
pub mod error;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod notifications;
pub mod pipeline;
pub mod settings;
pub mod uploader;

pub use archiver::Archiver;
pub use error::{ArchiveError, ConfigError, LifecycleError, UploadError};
pub use job::{run_job, JobContext, JobOutcome, RetryPolicy, SettlePolicy, UploadJob};
pub use monitor::{FileCreated, FolderMonitor};
pub use notifications::{ChannelSink, JsonLinesSink, LogSink, NotificationSink, PipelineEvent};
pub use pipeline::{MonitorState, PipelineController, PipelineOptions, PipelineState};
pub use settings::{Settings, SettingsStore};
pub use uploader::{ftp_uploader_factory, FileUploader, FtpUploader, UploaderFactory};
