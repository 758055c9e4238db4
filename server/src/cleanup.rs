//! Best-effort removal of request scoped files.
//!
//! Removal never fails from the caller's point of view: every attempt ends in
//! a [`CleanupOutcome`] that is logged and returned, never propagated.
//!
//! Two ways to get rid of a request's files:
//! - [`Cleaner::run_now`] on the failure path, awaited before the error
//!   response is produced;
//! - a [`Handoff`] on the success path, a set of [`CleanupJob`]s that is
//!   scheduled only once the response body starts streaming.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::storage::RequestWorkspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    NotFound,
    Failed(String),
}

impl CleanupOutcome {
    fn log(&self, path: &Path) {
        match self {
            CleanupOutcome::Removed => tracing::debug!("removed {}", path.display()),
            CleanupOutcome::NotFound => tracing::debug!("{} already gone", path.display()),
            CleanupOutcome::Failed(reason) => {
                tracing::warn!("error cleaning up {}: {reason}", path.display());
            }
        }
    }
}

impl From<io::Result<()>> for CleanupOutcome {
    fn from(result: io::Result<()>) -> Self {
        match result {
            Ok(()) => CleanupOutcome::Removed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupOutcome::NotFound,
            Err(e) => CleanupOutcome::Failed(e.to_string()),
        }
    }
}

/// Removes the file or directory (recursively) at `path`.
pub async fn remove_path(path: &Path) -> CleanupOutcome {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    let outcome = CleanupOutcome::from(result);
    outcome.log(path);
    outcome
}

/// Blocking twin of [`remove_path`] for callers without a runtime.
pub fn remove_path_blocking(path: &Path) -> CleanupOutcome {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    let outcome = CleanupOutcome::from(result);
    outcome.log(path);
    outcome
}

/// Removes the upload and converted directories of `workspace`.
pub async fn cleanup_workspace(workspace: &RequestWorkspace) -> [CleanupOutcome; 2] {
    [
        remove_path(workspace.upload_dir()).await,
        remove_path(workspace.converted_dir()).await,
    ]
}

/// A removal to perform after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub path: PathBuf,
    pub delay: Duration,
}

impl CleanupJob {
    pub fn now<P: Into<PathBuf>>(path: P) -> Self {
        Self::after(path, Duration::ZERO)
    }

    pub fn after<P: Into<PathBuf>>(path: P, delay: Duration) -> Self {
        Self {
            path: path.into(),
            delay,
        }
    }

    /// Jobs removing both working directories of `workspace`.
    #[must_use]
    pub fn for_workspace(workspace: &RequestWorkspace) -> Vec<Self> {
        vec![
            CleanupJob::now(workspace.upload_dir()),
            CleanupJob::now(workspace.converted_dir()),
        ]
    }
}

/// Runs cleanup jobs detached from the requests that scheduled them.
///
/// Scheduled jobs are tracked so that shutdown can flush them: [`Cleaner::drain`]
/// cuts every pending delay short and waits until all removals finished.
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    tracker: TaskTracker,
    flush: CancellationToken,
}

impl Cleaner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure path: removes the workspace directories and any archive of the
    /// request before returning.
    pub async fn run_now(&self, workspace: &RequestWorkspace) -> Vec<CleanupOutcome> {
        tracing::info!("cleaning up workspace {} after failure", workspace.id());
        let mut outcomes = cleanup_workspace(workspace).await.to_vec();
        outcomes.push(remove_path(workspace.archive_path()).await);
        outcomes
    }

    /// Removes `path` once `delay` elapsed, without holding up the caller.
    pub fn remove_after_delay<P: Into<PathBuf>>(&self, path: P, delay: Duration) {
        self.schedule(CleanupJob::after(path, delay));
    }

    pub fn schedule(&self, job: CleanupJob) {
        let Ok(handle) = Handle::try_current() else {
            remove_path_blocking(&job.path);
            return;
        };
        let flush = self.flush.clone();
        self.tracker.spawn_on(
            async move {
                if !job.delay.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(job.delay) => {}
                        () = flush.cancelled() => {
                            tracing::debug!("delay of {} cut short", job.path.display());
                        }
                    }
                }
                remove_path(&job.path).await;
            },
            &handle,
        );
    }

    /// Pending jobs handed over to the scheduler once the response is handed off.
    #[must_use]
    pub fn handoff(&self, jobs: Vec<CleanupJob>) -> Handoff {
        Handoff {
            cleaner: self.clone(),
            jobs,
        }
    }

    /// Number of scheduled jobs that did not finish yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every job scheduled so far completed, delays included.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Runs every pending job right away and waits for all of them.
    pub async fn drain(&self) {
        self.flush.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Cleanup that must not start before a response is on its way.
///
/// Dropping a `Handoff` without calling [`Handoff::schedule`] discards the jobs.
#[derive(Debug)]
#[must_use]
pub struct Handoff {
    cleaner: Cleaner,
    jobs: Vec<CleanupJob>,
}

impl Handoff {
    pub fn jobs(&self) -> &[CleanupJob] {
        &self.jobs
    }

    pub fn schedule(self) {
        for job in self.jobs {
            self.cleaner.schedule(job);
        }
    }
}
