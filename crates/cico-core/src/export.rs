//! Bulk export: one cancellable, throttled upload loop per user.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    domain::{Destination, UserId},
    errors::Error,
    progress::{snapshot, ProgressSnapshot},
    records::AttendanceRecord,
    report::{deliver_record, RecordFormatter},
    sender::RateLimitedSender,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ExportConfig {
    /// Pause after every record.
    pub inter_record_delay: Duration,
    /// Push a progress snapshot every N completed records (and on the last one).
    pub progress_every: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            inter_record_delay: Duration::from_secs(1),
            progress_every: 5,
        }
    }
}

/// Receives progress snapshots while an export runs.
///
/// Updates are best-effort: the controller discards the returned error on purpose,
/// a stale progress message never stops an export.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, progress: &ProgressSnapshot) -> Result<()>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed { total: usize },
    Cancelled { completed: usize, total: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("an export is already running for this user")]
    AlreadyRunning,

    #[error("nothing to export")]
    EmptyInput,

    #[error("export failed after {completed}/{total} records: {cause}")]
    Failed {
        completed: usize,
        total: usize,
        cause: Error,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    NotFound,
}

struct ActiveJob {
    cancel: CancellationToken,
}

/// Process-wide map of running exports, keyed by user.
///
/// Entries are created through [`ExportRegistry::register`] and removed when the returned
/// guard drops, so every exit path of the loop releases the user's slot exactly once.
#[derive(Default)]
pub struct ExportRegistry {
    jobs: Mutex<HashMap<UserId, ActiveJob>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<UserId, ActiveJob>> {
        // Entries are plain data; a panic elsewhere cannot leave them half-written.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn is_running(&self, user: UserId) -> bool {
        self.jobs().contains_key(&user)
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.jobs().len()
    }

    /// Atomically claim the user's slot.
    pub fn register(self: &Arc<Self>, user: UserId) -> Option<JobGuard> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&user) {
            return None;
        }
        let cancel = CancellationToken::new();
        jobs.insert(
            user,
            ActiveJob {
                cancel: cancel.clone(),
            },
        );
        Some(JobGuard {
            registry: Arc::clone(self),
            user,
            cancel,
        })
    }

    /// Flag the user's export for cancellation; the loop stops at its next record boundary.
    pub fn cancel(&self, user: UserId) -> CancelOutcome {
        match self.jobs().get(&user) {
            Some(job) => {
                job.cancel.cancel();
                CancelOutcome::Requested
            }
            None => CancelOutcome::NotFound,
        }
    }
}

pub struct JobGuard {
    registry: Arc<ExportRegistry>,
    user: UserId,
    cancel: CancellationToken,
}

impl JobGuard {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.jobs().remove(&self.user);
        debug!(user_id = self.user.0, "export slot released");
    }
}

/// Mutable state of one running export.
struct ExportJob {
    guard: JobGuard,
    total: usize,
    completed: usize,
    started: Instant,
}

pub struct ExportController {
    registry: Arc<ExportRegistry>,
    formatter: Arc<RecordFormatter>,
    sender: Arc<RateLimitedSender>,
    cfg: ExportConfig,
}

impl ExportController {
    pub fn new(
        registry: Arc<ExportRegistry>,
        formatter: Arc<RecordFormatter>,
        sender: Arc<RateLimitedSender>,
        cfg: ExportConfig,
    ) -> Self {
        Self {
            registry,
            formatter,
            sender,
            cfg,
        }
    }

    pub fn registry(&self) -> &Arc<ExportRegistry> {
        &self.registry
    }

    #[cfg(test)]
    fn is_running(&self, user: UserId) -> bool {
        self.registry.is_running(user)
    }

    pub fn cancel(&self, user: UserId) -> CancelOutcome {
        self.registry.cancel(user)
    }

    /// Claim the user's export slot up front.
    ///
    /// Handlers claim before fetching records, so a concurrent request is turned away
    /// before it does any work. The guard is then handed to [`ExportController::run_claimed`].
    pub fn claim(&self, user: UserId) -> std::result::Result<JobGuard, ExportError> {
        self.registry
            .register(user)
            .ok_or(ExportError::AlreadyRunning)
    }

    /// Upload `records` to `dest` in the given order.
    ///
    /// Callers pass bulk exports oldest-first. `stretch` is forwarded to image processing.
    pub async fn start_export(
        &self,
        user: UserId,
        records: &[AttendanceRecord],
        dest: &Destination,
        stretch: bool,
        status: &dyn StatusSink,
    ) -> std::result::Result<ExportOutcome, ExportError> {
        let guard = self.claim(user)?;
        self.run_claimed(guard, records, dest, stretch, status).await
    }

    /// Run an export under a slot obtained from [`ExportController::claim`].
    /// The slot is released when this returns.
    pub async fn run_claimed(
        &self,
        guard: JobGuard,
        records: &[AttendanceRecord],
        dest: &Destination,
        stretch: bool,
        status: &dyn StatusSink,
    ) -> std::result::Result<ExportOutcome, ExportError> {
        if records.is_empty() {
            return Err(ExportError::EmptyInput);
        }
        let user = guard.user;

        let mut job = ExportJob {
            guard,
            total: records.len(),
            completed: 0,
            started: Instant::now(),
        };
        info!(user_id = user.0, total = job.total, %dest, "export started");

        let outcome = self.run(&mut job, records, dest, stretch, status).await;
        match &outcome {
            Ok(ExportOutcome::Completed { total }) => {
                info!(user_id = user.0, total, "export completed");
            }
            Ok(ExportOutcome::Cancelled { completed, total }) => {
                info!(user_id = user.0, completed, total, "export cancelled");
            }
            Err(e) => error!(user_id = user.0, error = %e, "export aborted"),
        }
        outcome
    }

    async fn run(
        &self,
        job: &mut ExportJob,
        records: &[AttendanceRecord],
        dest: &Destination,
        stretch: bool,
        status: &dyn StatusSink,
    ) -> std::result::Result<ExportOutcome, ExportError> {
        let every = self.cfg.progress_every.max(1);

        for record in records {
            if job.guard.is_cancelled() {
                return Ok(ExportOutcome::Cancelled {
                    completed: job.completed,
                    total: job.total,
                });
            }

            match deliver_record(&self.formatter, &self.sender, record, dest, stretch).await {
                Ok(report) if report.skipped > 0 => {
                    debug!(date = %record.date, skipped = report.skipped, "record partially delivered");
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ExportError::Failed {
                        completed: job.completed,
                        total: job.total,
                        cause: e.into(),
                    })
                }
            }
            job.completed += 1;

            if job.completed % every == 0 || job.completed == job.total {
                let snap = snapshot(job.completed, job.total, job.started, Instant::now());
                if let Err(e) = status.publish(&snap).await {
                    debug!(error = %e, "progress update dropped");
                }
            }

            sleep(self.cfg.inter_record_delay).await;
        }

        Ok(ExportOutcome::Completed { total: job.total })
    }
}
