//! Pipeline lifecycle: monitor, dispatcher and worker pool.
//!
//! ```text
//! FolderMonitor ──FileCreated──▶ dispatcher ──spawn──▶ JoinSet<run_job>
//!      (bounded mpsc)               │ Semaphore(workers)
//!                                   └─ shutdown (watch) ─▶ drain / abort
//! ```

use crate::archiver::Archiver;
use crate::error::{LifecycleError, UploadError};
use crate::job::{run_job, JobContext, JobOutcome, RetryPolicy, SettlePolicy};
use crate::monitor::{FileCreated, FolderMonitor, DEFAULT_QUEUE_CAPACITY, DEFAULT_STOP_TIMEOUT};
use crate::notifications::NotificationSink;
use crate::settings::{Settings, SettingsStore};
use crate::uploader::UploaderFactory;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

pub const DEFAULT_WORKERS: usize = 3;

/// Shared handle for the UI layer; lifecycle calls are mutually exclusive.
pub type PipelineState = Arc<Mutex<PipelineController>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorState {
    Active,
    Inactive,
}

/// Runtime tuning that does not live in the settings file.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub stop_timeout: Duration,
    pub retry: RetryPolicy,
    pub settle: SettlePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            retry: RetryPolicy::default(),
            settle: SettlePolicy::default(),
        }
    }
}

/// How the dispatcher wound down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DrainReport {
    /// Buffered events that never started.
    skipped: usize,
    /// Jobs aborted at the deadline.
    aborted: usize,
}

impl DrainReport {
    fn timed_out(&self) -> bool {
        self.skipped > 0 || self.aborted > 0
    }
}

struct ActivePipeline {
    monitor: FolderMonitor,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<DrainReport>,
}

pub struct PipelineController {
    store: Arc<SettingsStore>,
    sink: Arc<dyn NotificationSink>,
    factory: UploaderFactory,
    archiver: Archiver,
    options: PipelineOptions,
    active: Option<ActivePipeline>,
}

impl PipelineController {
    pub fn new(
        store: Arc<SettingsStore>,
        sink: Arc<dyn NotificationSink>,
        factory: UploaderFactory,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            sink,
            factory,
            archiver: Archiver::new(),
            options,
            active: None,
        }
    }

    pub fn into_state(self) -> PipelineState {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> MonitorState {
        if self.active.is_some() {
            MonitorState::Active
        } else {
            MonitorState::Inactive
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.store.get()
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn job_context(&self, settings: &Settings) -> Arc<JobContext> {
        Arc::new(JobContext {
            uploader: (self.factory)(settings),
            archiver: self.archiver.clone(),
            sink: self.sink.clone(),
            target_dir: settings.target_dir.clone(),
            retry: self.options.retry,
            settle: self.options.settle,
        })
    }

    /// Begin watching `source_dir` with the current settings. No-op while
    /// active.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.active.is_some() {
            return Ok(());
        }

        let settings = self.store.get();
        for dir in [&settings.source_dir, &settings.target_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| LifecycleError::Directory {
                    path: dir.clone(),
                    source,
                })?;
        }

        let ctx = self.job_context(&settings);
        let mut monitor = FolderMonitor::new(&settings.source_dir, self.options.queue_capacity);
        let events = monitor.start()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(
            events,
            shutdown_rx,
            ctx,
            self.options.workers.max(1),
            self.options.stop_timeout,
        ));

        log::info!(
            "Pipeline active: {} -> {}:{}{} (archive {})",
            settings.source_dir.display(),
            settings.host,
            settings.port,
            settings.remote_dir,
            settings.target_dir.display()
        );
        self.active = Some(ActivePipeline {
            monitor,
            shutdown_tx,
            dispatcher,
        });
        Ok(())
    }

    /// Stop watching and wind the dispatcher down within `stop_timeout`.
    /// Returns `MonitorStopTimeout` if anything had to be cut short; every
    /// affected file has been reported by then. No-op while inactive.
    pub async fn stop(&mut self) -> Result<(), LifecycleError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        let timeout = self.options.stop_timeout;

        active.monitor.stop_accepting();
        let _ = active.shutdown_tx.send(true);
        let (monitor_result, drained) =
            tokio::join!(active.monitor.stop(timeout), active.dispatcher);

        let report = match drained {
            Ok(report) => report,
            Err(e) => {
                log::error!("Dispatcher task failed: {}", e);
                DrainReport::default()
            }
        };
        log::info!("Pipeline inactive");

        if report.timed_out() {
            log::warn!(
                "Stop deadline hit: {} queued and {} running jobs cancelled",
                report.skipped,
                report.aborted
            );
            return Err(LifecycleError::MonitorStopTimeout(timeout));
        }
        monitor_result
    }

    /// `stop()` then `start()`. The new monitor is started even if the
    /// stop timed out; that stop error is still returned.
    pub async fn restart(&mut self) -> Result<(), LifecycleError> {
        let stopped = self.stop().await;
        if let Err(e) = &stopped {
            log::warn!("Restart: {}", e);
        }
        self.start().await?;
        stopped
    }

    /// Pause or resume. Returns the new state, or the error that kept the
    /// transition from completing cleanly.
    pub async fn toggle(&mut self) -> Result<MonitorState, LifecycleError> {
        match self.state() {
            MonitorState::Active => self.stop().await?,
            MonitorState::Inactive => self.start().await?,
        }
        Ok(self.state())
    }

    /// Persist new settings and, if running, restart with them.
    pub async fn apply_settings(&mut self, settings: Settings) -> Result<(), LifecycleError> {
        self.store.save(&settings)?;
        if self.active.is_some() {
            self.restart().await?;
        }
        Ok(())
    }

    /// Re-read the settings file and, if running, restart with it.
    pub async fn reload_settings(&mut self) -> Result<(), LifecycleError> {
        self.store.load()?;
        if self.active.is_some() {
            self.restart().await?;
        }
        Ok(())
    }

    /// Run one job for `event` immediately with the current settings,
    /// outside the worker pool.
    pub async fn handle_event(&self, event: FileCreated) -> JobOutcome {
        let settings = self.store.get();
        run_job(self.job_context(&settings), event).await
    }
}

fn log_join(result: Result<JobOutcome, JoinError>) {
    match result {
        Ok(outcome) => log::trace!("Job finished: {:?}", outcome),
        Err(e) if e.is_panic() => log::error!("Upload job panicked: {}", e),
        Err(_) => {}
    }
}

async fn dispatch(
    mut events: mpsc::Receiver<FileCreated>,
    mut shutdown: watch::Receiver<bool>,
    ctx: Arc<JobContext>,
    workers: usize,
    stop_timeout: Duration,
) -> DrainReport {
    let permits = Arc::new(Semaphore::new(workers));
    let mut jobs = JoinSet::new();
    let mut pending = VecDeque::new();

    'run: loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break 'run,
            Some(res) = jobs.join_next(), if !jobs.is_empty() => log_join(res),
            event = events.recv() => {
                let Some(event) = event else { break 'run };
                let permit = tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        pending.push_back(event);
                        break 'run;
                    }
                    permit = permits.clone().acquire_owned() => permit,
                };
                let Ok(permit) = permit else { break 'run };
                let ctx = ctx.clone();
                jobs.spawn(async move {
                    let _permit = permit;
                    run_job(ctx, event).await
                });
            }
        }
    }

    // Nothing new gets in; whatever is buffered still runs.
    events.close();
    while let Ok(event) = events.try_recv() {
        pending.push_back(event);
    }

    let drain = async {
        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(event) = pending.pop_front() else {
                break;
            };
            let ctx = ctx.clone();
            jobs.spawn(async move {
                let _permit = permit;
                run_job(ctx, event).await
            });
        }
        while let Some(res) = jobs.join_next().await {
            log_join(res);
        }
    };
    if tokio::time::timeout(stop_timeout, drain).await.is_ok() {
        return DrainReport::default();
    }

    let report = DrainReport {
        skipped: pending.len(),
        aborted: jobs.len(),
    };
    for event in pending.drain(..) {
        report_unstarted(&*ctx.sink, event.path());
    }
    jobs.abort_all();
    while let Some(res) = jobs.join_next().await {
        log_join(res);
    }
    report
}

fn report_unstarted(sink: &dyn NotificationSink, path: &Path) {
    log::warn!("Not uploading {}: pipeline stopped", path.display());
    sink.on_upload_failure(
        path,
        &UploadError::Cancelled("pipeline stopped before the upload started".into()),
    );
}
