//! A single upload job: settle, upload (with retry), archive, report.

use crate::archiver::Archiver;
use crate::error::{ArchiveError, UploadError};
use crate::monitor::FileCreated;
use crate::notifications::NotificationSink;
use crate::uploader::FileUploader;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// One file to upload. Consumed by exactly one [`run_job`] call.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub id: Uuid,
    pub local_path: PathBuf,
    pub remote_name: String,
    pub created_at: DateTime<Utc>,
}

impl UploadJob {
    /// The remote name is the base name, which must be UTF-8 and fit on one
    /// control-channel line.
    pub fn from_event(event: &FileCreated) -> Result<Self, UploadError> {
        let path = event.path();
        let remote_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidName(path.display().to_string()))?;
        if remote_name.is_empty() || remote_name.contains(&['\r', '\n'][..]) {
            return Err(UploadError::InvalidName(remote_name.escape_debug().to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            local_path: path.to_path_buf(),
            remote_name: remote_name.to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Exponential backoff for retryable upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// How long to wait for a freshly created file to stop growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Size and mtime must be unchanged across this interval. Zero skips
    /// the check.
    pub interval: Duration,
    pub max_checks: u32,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_checks: 20,
        }
    }
}

/// What happened to a job. Mirrors the sink callback that was fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Uploaded { archived_to: PathBuf },
    UploadFailed(UploadError),
    ArchiveFailed(ArchiveError),
}

/// Everything a job needs; shared by all jobs of one pipeline run.
pub struct JobContext {
    pub uploader: Arc<dyn FileUploader>,
    pub archiver: Archiver,
    pub sink: Arc<dyn NotificationSink>,
    pub target_dir: PathBuf,
    pub retry: RetryPolicy,
    pub settle: SettlePolicy,
}

/// Reports an aborted or panicked job from `Drop`.
struct JobGuard {
    sink: Arc<dyn NotificationSink>,
    path: PathBuf,
    uploaded: bool,
    done: bool,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.uploaded {
            log::warn!("Archiving of {} interrupted", self.path.display());
            self.sink.on_archive_failure(
                &self.path,
                &ArchiveError::Io {
                    path: self.path.clone(),
                    message: "interrupted before the file was archived".into(),
                },
            );
        } else {
            log::warn!("Upload of {} cancelled", self.path.display());
            self.sink.on_upload_failure(
                &self.path,
                &UploadError::Cancelled("pipeline stopped before the upload finished".into()),
            );
        }
    }
}

/// Run one job to completion and report it through `ctx.sink`. Exactly
/// one sink callback fires per call, including when the future is dropped
/// early.
pub async fn run_job(ctx: Arc<JobContext>, event: FileCreated) -> JobOutcome {
    let mut guard = JobGuard {
        sink: ctx.sink.clone(),
        path: event.path().to_path_buf(),
        uploaded: false,
        done: false,
    };
    let outcome = execute(&ctx, &event, &mut guard).await;
    guard.done = true;

    let path = event.path();
    match &outcome {
        JobOutcome::Uploaded { archived_to } => ctx.sink.on_upload_success(path, archived_to),
        JobOutcome::UploadFailed(e) => ctx.sink.on_upload_failure(path, e),
        JobOutcome::ArchiveFailed(e) => ctx.sink.on_archive_failure(path, e),
    }
    outcome
}

async fn execute(ctx: &JobContext, event: &FileCreated, guard: &mut JobGuard) -> JobOutcome {
    let job = match UploadJob::from_event(event) {
        Ok(job) => job,
        Err(e) => return JobOutcome::UploadFailed(e),
    };
    log::debug!("Job {} for {}", job.id, job.local_path.display());

    if let Err(e) = wait_until_settled(&job.local_path, ctx.settle).await {
        return JobOutcome::UploadFailed(e);
    }

    if let Err(e) = upload_with_retry(ctx, &job).await {
        return JobOutcome::UploadFailed(e);
    }
    guard.uploaded = true;

    match ctx
        .archiver
        .archive_as(&job.local_path, &ctx.target_dir, job.id)
        .await
    {
        Ok(archived_to) => JobOutcome::Uploaded { archived_to },
        Err(e) => JobOutcome::ArchiveFailed(e),
    }
}

async fn upload_with_retry(ctx: &JobContext, job: &UploadJob) -> Result<u64, UploadError> {
    let mut retry = 0;
    loop {
        match ctx.uploader.upload(&job.local_path, &job.remote_name).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && retry < ctx.retry.max_retries => {
                let delay = ctx.retry.delay_for(retry);
                retry += 1;
                log::warn!(
                    "Upload of {} failed ({}), retry {}/{} in {:?}",
                    job.local_path.display(),
                    e,
                    retry,
                    ctx.retry.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn snapshot(path: &Path) -> Result<(u64, Option<SystemTime>), UploadError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| UploadError::LocalFile(format!("{}: {}", path.display(), e)))?;
    Ok((meta.len(), meta.modified().ok()))
}

/// Wait until size and mtime stop changing. Gives up quietly after
/// `max_checks` intervals and lets the upload proceed.
async fn wait_until_settled(path: &Path, policy: SettlePolicy) -> Result<(), UploadError> {
    if policy.interval.is_zero() {
        return Ok(());
    }
    let mut last = snapshot(path)?;
    for _ in 0..policy.max_checks {
        tokio::time::sleep(policy.interval).await;
        let now = snapshot(path)?;
        if now == last {
            return Ok(());
        }
        last = now;
    }
    log::warn!(
        "{} still changing after {} checks, uploading anyway",
        path.display(),
        policy.max_checks
    );
    Ok(())
}
