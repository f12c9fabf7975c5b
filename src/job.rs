// ABOUTME: Job Controller owning one background worker per dump, import or migration
// ABOUTME: Tracks progress with atomics, carries the cancel flag and builds terminal results

use crate::config::{JobConfig, JobKind};
use crate::connection::{DestinationConnection, SourceConnection};
use crate::error::{error_kind, ErrorKind, RowDiagnostic, TransferError};
use crate::utils::sanitize_identifier;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobStatus::Pending,
            1 => JobStatus::Running,
            2 => JobStatus::Completed,
            3 => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed => 2,
            JobStatus::Cancelled => 3,
            JobStatus::Failed => 4,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    ReadingSchema,
    Transferring,
    Finalizing,
    Done,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Starting,
            1 => Phase::ReadingSchema,
            2 => Phase::Transferring,
            3 => Phase::Finalizing,
            _ => Phase::Done,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Starting => 0,
            Phase::ReadingSchema => 1,
            Phase::Transferring => 2,
            Phase::Finalizing => 3,
            Phase::Done => 4,
        }
    }
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Progress of one job, written by its worker and read by any observer
///
/// The cancellation flag is the only field written from outside the worker.
#[derive(Debug)]
pub struct ProgressState {
    rows_processed: AtomicU64,
    total_rows: AtomicU64,
    phase: AtomicU8,
    status: AtomicU8,
    cancel_requested: AtomicBool,
}

/// Point-in-time copy of a job's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub rows_processed: u64,
    pub total_rows: Option<u64>,
    pub phase: Phase,
    pub status: JobStatus,
    pub cancel_requested: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            rows_processed: AtomicU64::new(0),
            total_rows: AtomicU64::new(UNKNOWN_TOTAL),
            phase: AtomicU8::new(Phase::Starting.as_u8()),
            status: AtomicU8::new(JobStatus::Pending.as_u8()),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Ask the worker to stop at its next batch boundary
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Acquire)
    }

    pub fn total_rows(&self) -> Option<u64> {
        match self.total_rows.load(Ordering::Acquire) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            rows_processed: self.rows_processed(),
            total_rows: self.total_rows(),
            phase: self.phase(),
            status: self.status(),
            cancel_requested: self.is_cancel_requested(),
        }
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.total_rows
            .store(total.unwrap_or(UNKNOWN_TOTAL), Ordering::Release);
    }

    pub(crate) fn add_rows(&self, rows: u64) {
        self.rows_processed.fetch_add(rows, Ordering::AcqRel);
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(anyhow::Error::new(TransferError::Cancelled));
        }
        Ok(())
    }

    /// Record the terminal status for a finished worker and build its result
    pub(crate) fn finish(&self, outcome: Result<()>, diagnostics: Vec<RowDiagnostic>) -> JobResult {
        let rows = self.rows_processed();
        let result = match outcome {
            Ok(()) => JobResult::completed(rows, diagnostics),
            Err(e) if error_kind(&e) == ErrorKind::Cancelled => {
                tracing::info!("Job cancelled after {} rows", rows);
                JobResult::cancelled(rows, diagnostics)
            }
            Err(e) => {
                tracing::error!("Job failed after {} rows: {:#}", rows, e);
                JobResult::failed(rows, &e, diagnostics)
            }
        };
        self.set_phase(Phase::Done);
        self.set_status(result.status);
        result
    }
}

/// Fatal error carried by a failed job result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub status: JobStatus,
    /// Rows written to the sink or committed to the destination
    pub rows: u64,
    pub diagnostics: Vec<RowDiagnostic>,
    pub error: Option<JobError>,
}

impl JobResult {
    pub fn completed(rows: u64, diagnostics: Vec<RowDiagnostic>) -> Self {
        Self {
            status: JobStatus::Completed,
            rows,
            diagnostics,
            error: None,
        }
    }

    pub fn cancelled(rows: u64, diagnostics: Vec<RowDiagnostic>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            rows,
            diagnostics,
            error: None,
        }
    }

    pub fn failed(rows: u64, err: &anyhow::Error, diagnostics: Vec<RowDiagnostic>) -> Self {
        Self {
            status: JobStatus::Failed,
            rows,
            diagnostics,
            error: Some(JobError {
                kind: error_kind(err),
                message: format!("{:#}", err),
            }),
        }
    }

    /// Completed, but some rows were skipped and recorded as diagnostics
    pub fn is_partial(&self) -> bool {
        self.status == JobStatus::Completed && !self.diagnostics.is_empty()
    }

    /// Fatal error message, or the first row diagnostic of a partial success
    pub fn first_error(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|e| format!("{} ({})", e.message, e.kind))
            .or_else(|| self.diagnostics.first().map(ToString::to_string))
    }
}

/// One invocation with its connections and fully resolved configuration
pub enum Job {
    Dump {
        source: Box<dyn SourceConnection>,
        config: JobConfig,
    },
    Import {
        destination: Box<dyn DestinationConnection>,
        config: JobConfig,
    },
    Migrate {
        source: Box<dyn SourceConnection>,
        destination: Box<dyn DestinationConnection>,
        config: JobConfig,
    },
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Dump { .. } => JobKind::Dump,
            Job::Import { .. } => JobKind::Import,
            Job::Migrate { .. } => JobKind::Migrate,
        }
    }

    pub fn config(&self) -> &JobConfig {
        match self {
            Job::Dump { config, .. } | Job::Import { config, .. } | Job::Migrate { config, .. } => {
                config
            }
        }
    }
}

/// Starts jobs, each on its own tokio task with its own progress state
pub struct JobController;

impl JobController {
    /// Validate the job's configuration and spawn its worker
    ///
    /// An invalid configuration is returned as an `INVALID_CONFIG` error and
    /// no worker is started. Must be called from within a tokio runtime.
    pub fn start(job: Job) -> Result<JobHandle> {
        let kind = job.kind();
        job.config().validate(kind)?;

        let label = sanitize_identifier(&job.config().source.to_string());
        let progress = Arc::new(ProgressState::new());
        let worker_progress = Arc::clone(&progress);

        tracing::info!("Starting {:?} job for {}", kind, label);
        let task = tokio::spawn(async move {
            worker_progress.set_status(JobStatus::Running);
            let result = match job {
                Job::Dump { mut source, config } => {
                    crate::dump::run_dump(source.as_mut(), &config, &worker_progress).await
                }
                Job::Import {
                    mut destination,
                    config,
                } => crate::import::run_import(destination.as_mut(), &config, &worker_progress)
                    .await,
                Job::Migrate {
                    mut source,
                    mut destination,
                    config,
                } => {
                    crate::migration::run_migration(
                        source.as_mut(),
                        destination.as_mut(),
                        &config,
                        &worker_progress,
                    )
                    .await
                }
            };
            tracing::info!(
                "{:?} job for {} finished: {} ({} rows)",
                kind,
                label,
                result.status,
                result.rows
            );
            result
        });

        Ok(JobHandle { progress, task })
    }
}

/// Handle to a running job
pub struct JobHandle {
    progress: Arc<ProgressState>,
    task: JoinHandle<JobResult>,
}

impl JobHandle {
    pub fn progress(&self) -> Arc<ProgressState> {
        Arc::clone(&self.progress)
    }

    pub fn cancel(&self) {
        self.progress.request_cancel();
    }

    pub fn status(&self) -> JobStatus {
        self.progress.status()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker's terminal result
    ///
    /// A worker that panicked or was aborted is reported as failed.
    pub async fn wait(self) -> JobResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let err = anyhow::anyhow!("job worker terminated abnormally: {}", e);
                tracing::error!("{}", err);
                let result = JobResult::failed(self.progress.rows_processed(), &err, Vec::new());
                self.progress.set_phase(Phase::Done);
                self.progress.set_status(JobStatus::Failed);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;

    #[test]
    fn test_progress_defaults_and_snapshot() {
        let progress = ProgressState::new();
        let snap = progress.snapshot();
        assert_eq!(snap.rows_processed, 0);
        assert_eq!(snap.total_rows, None);
        assert_eq!(snap.phase, Phase::Starting);
        assert_eq!(snap.status, JobStatus::Pending);

        progress.set_total(Some(10));
        progress.add_rows(4);
        progress.request_cancel();
        let snap = progress.snapshot();
        assert_eq!(snap.total_rows, Some(10));
        assert_eq!(snap.rows_processed, 4);
        assert!(snap.cancel_requested);
    }

    #[test]
    fn test_finish_maps_outcomes_to_status() {
        let progress = ProgressState::new();
        progress.add_rows(3);
        let result = progress.finish(Err(TransferError::Cancelled.into()), Vec::new());
        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(result.rows, 3);
        assert_eq!(progress.status(), JobStatus::Cancelled);
        assert_eq!(progress.phase(), Phase::Done);

        let progress = ProgressState::new();
        let err = anyhow::Error::new(TransferError::SinkUnavailable("disk full".into()));
        let result = progress.finish(Err(err), Vec::new());
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::SinkUnavailable);
    }

    #[test]
    fn test_partial_success() {
        let diag = RowDiagnostic::new(5, ErrorKind::MalformedValue, "bad integer");
        let result = JobResult::completed(9, vec![diag]);
        assert!(result.is_partial());
        assert!(result.first_error().unwrap().contains("row 5"));
        assert!(!JobResult::completed(10, Vec::new()).is_partial());
    }

    #[test]
    fn test_result_serializes_as_json() {
        let result = JobResult::completed(2, Vec::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["rows"], 2);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        struct NoSource;

        #[async_trait::async_trait]
        impl SourceConnection for NoSource {
            async fn describe(
                &mut self,
                _source: &crate::model::TableSource,
            ) -> Result<Vec<crate::model::ColumnDescriptor>> {
                unreachable!("worker must not start")
            }

            async fn estimate_rows(&mut self, _source: &crate::model::TableSource) -> Result<Option<u64>> {
                Ok(None)
            }

            async fn open_cursor<'a>(
                &'a mut self,
                _source: &crate::model::TableSource,
                _columns: &[crate::model::ColumnDescriptor],
            ) -> Result<Box<dyn crate::connection::RowCursor + 'a>> {
                unreachable!("worker must not start")
            }
        }

        // no output location
        let config = JobConfig::for_table("users", DataFormat::Delimited);
        let err = JobController::start(Job::Dump {
            source: Box::new(NoSource),
            config,
        })
        .err()
        .unwrap();
        assert_eq!(error_kind(&err), ErrorKind::InvalidConfig);
    }
}
