//! Watches the source folder for newly created files.
//!
//! One non-recursive OS watch per monitor. The backend thread filters
//! events and pushes `FileCreated` into a bounded channel; when the channel
//! is full that thread blocks, the async side never does.

use crate::error::LifecycleError;
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A regular file appeared in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCreated(pub PathBuf);

impl FileCreated {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

enum Phase {
    Idle,
    Running(RecommendedWatcher),
    Stopped,
}

/// Single-use watcher over one directory: `Idle -> Running -> Stopped`.
pub struct FolderMonitor {
    source_dir: PathBuf,
    capacity: usize,
    accepting: Arc<AtomicBool>,
    phase: Phase,
}

impl FolderMonitor {
    pub fn new(source_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            source_dir: source_dir.into(),
            capacity: capacity.max(1),
            accepting: Arc::new(AtomicBool::new(false)),
            phase: Phase::Idle,
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// Begin watching. The returned receiver yields one `FileCreated` per
    /// creation notification until the monitor is stopped.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FileCreated>, LifecycleError> {
        match self.phase {
            Phase::Idle => {}
            Phase::Running(_) => {
                return Err(LifecycleError::MonitorStart {
                    path: self.source_dir.clone(),
                    message: "already running".into(),
                })
            }
            Phase::Stopped => return Err(LifecycleError::MonitorConsumed),
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let accepting = self.accepting.clone();
        let start_err = |e: notify::Error| LifecycleError::MonitorStart {
            path: self.source_dir.clone(),
            message: e.to_string(),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if !accepting.load(Ordering::Acquire) {
                    return;
                }
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Folder watch error: {}", e);
                        return;
                    }
                };
                let EventKind::Create(kind) = event.kind else {
                    return;
                };
                for path in event.paths {
                    if !is_file_creation(kind, &path) {
                        continue;
                    }
                    log::debug!("Created: {}", path.display());
                    // Fails only once the receiving side has gone away.
                    if tx.blocking_send(FileCreated(path)).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )
        .map_err(start_err)?;

        self.accepting.store(true, Ordering::Release);
        if let Err(e) = watcher.watch(&self.source_dir, RecursiveMode::NonRecursive) {
            self.accepting.store(false, Ordering::Release);
            return Err(start_err(e));
        }

        log::info!("Watching {}", self.source_dir.display());
        self.phase = Phase::Running(watcher);
        Ok(rx)
    }

    /// Drop any further notifications without tearing the watch down.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Stop emitting immediately and tear the OS watch down, waiting at
    /// most `timeout` for the backend to let go. No-op unless running.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), LifecycleError> {
        self.stop_accepting();
        let watcher = match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Running(w) => w,
            Phase::Idle => {
                self.phase = Phase::Idle;
                return Ok(());
            }
            Phase::Stopped => return Ok(()),
        };

        let source_dir = self.source_dir.clone();
        let teardown = tokio::task::spawn_blocking(move || {
            let mut watcher = watcher;
            if let Err(e) = watcher.unwatch(&source_dir) {
                log::debug!("unwatch {}: {}", source_dir.display(), e);
            }
            drop(watcher);
        });

        match tokio::time::timeout(timeout, teardown).await {
            Ok(_) => {
                log::info!("Stopped watching {}", self.source_dir.display());
                Ok(())
            }
            Err(_) => {
                log::warn!(
                    "Watch on {} did not shut down within {:?}",
                    self.source_dir.display(),
                    timeout
                );
                Err(LifecycleError::MonitorStopTimeout(timeout))
            }
        }
    }
}

fn is_file_creation(kind: CreateKind, path: &Path) -> bool {
    match kind {
        CreateKind::File => true,
        CreateKind::Folder => false,
        // Backends that don't say what was created.
        CreateKind::Any | CreateKind::Other => std::fs::metadata(path)
            .map(|m| !m.is_dir())
            .unwrap_or(true),
    }
}
