//! One ingestion attempt for a named job.
//!
//! 1. Resolve the job; a missing or inactive job ends the attempt with no history row.
//! 2. Try to start it; contention records a `warning` row and stops.
//! 3. Fetch the whole snapshot (bounded by the fetch timeout).
//! 4. Write the six fact groups.
//! 5. Return the job to idle and record exactly one `succeeded` or `failed` row.
//!
//! Ingestion failures are contained: they come back as [`RunOutcome::Failed`],
//! never as an `Err`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use epistat_core::config::CronConfig;
use epistat_core::now_seconds;
use epistat_storage::{RunStatus, StatsStore};

use crate::error::{IngestError, RunError};
use crate::history::HistoryRecorder;
use crate::lifecycle::{RunLifecycle, StartOutcome};
use crate::provider::{fetch_snapshot, StatsProvider};
use crate::writer::{StatWriter, WriteSummary};

/// Message stored on the history row when the job is already running.
pub const ALREADY_IN_PROGRESS_MESSAGE: &str = "job was already in progress";

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(WriteSummary),
    AlreadyInProgress,
    Failed(IngestError),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Succeeded(_) => RunStatus::Succeeded,
            Self::AlreadyInProgress => RunStatus::Warning,
            Self::Failed(_) => RunStatus::Failed,
        }
    }
}

/// Result of one orchestrator invocation.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

pub struct Orchestrator {
    store: Arc<dyn StatsStore>,
    provider: Arc<dyn StatsProvider>,
    job_name: String,
    fetch_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StatsStore>,
        provider: Arc<dyn StatsProvider>,
        config: &CronConfig,
    ) -> Self {
        Self {
            store,
            provider,
            job_name: config.job_name.clone(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Run one attempt. `Err` only for a missing/inactive job or a store
    /// failure around the lifecycle itself.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", job = %self.job_name, run_id = %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport, RunError> {
        let started_at = now_seconds();
        let store = self.store.as_ref();
        let lifecycle = RunLifecycle::new(store);

        let job = lifecycle.eligible_job(&self.job_name).await?;
        let history = HistoryRecorder::new(store, run_id, &job.name, started_at);

        let run = match lifecycle.try_start(job).await? {
            StartOutcome::Started(run) => run,
            StartOutcome::AlreadyInProgress(_) => {
                history
                    .record(
                        RunStatus::Warning,
                        Some(ALREADY_IN_PROGRESS_MESSAGE.to_string()),
                        None,
                    )
                    .await?;
                return Ok(self.report(run_id, started_at, RunOutcome::AlreadyInProgress));
            }
        };

        let clock = Instant::now();
        let result = self.ingest().await;
        let succeeded = result.is_ok();
        let message = match &result {
            Ok(summary) => summary.to_string(),
            Err(e) => format!("ingestion failed for job '{}': {}", self.job_name, e),
        };

        // Both writes are attempted even if the first one fails.
        let stopped = lifecycle.stop(run, succeeded).await;
        let status = if succeeded { RunStatus::Succeeded } else { RunStatus::Failed };
        let recorded = history.record(status, Some(message), None).await;
        stopped?;
        recorded?;

        let outcome = match result {
            Ok(summary) => {
                info!(elapsed_ms = clock.elapsed().as_millis() as u64, "{}", summary);
                RunOutcome::Succeeded(summary)
            }
            Err(e) => {
                error!(
                    elapsed_ms = clock.elapsed().as_millis() as u64,
                    error = %e,
                    "ingestion run failed"
                );
                RunOutcome::Failed(e)
            }
        };
        Ok(self.report(run_id, started_at, outcome))
    }

    async fn ingest(&self) -> Result<WriteSummary, IngestError> {
        let snapshot = tokio::time::timeout(self.fetch_timeout, fetch_snapshot(self.provider.as_ref()))
            .await
            .map_err(|_| IngestError::FetchTimeout(self.fetch_timeout))??;

        info!(
            updated = %snapshot.updated,
            cities = snapshot.by_city.len(),
            age_rows = snapshot.by_age.len(),
            "snapshot fetched"
        );

        let mut writer = StatWriter::new(self.store.as_ref(), snapshot.updated);
        writer.write_snapshot(&snapshot).await
    }

    fn report(&self, run_id: Uuid, started_at: DateTime<Utc>, outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id,
            job_name: self.job_name.clone(),
            started_at,
            outcome,
        }
    }
}

/// Log a finished invocation the way both the one-shot and scheduled modes report it.
pub fn log_run_result(result: &Result<RunReport, RunError>) {
    match result {
        Ok(report) => match &report.outcome {
            RunOutcome::Succeeded(summary) => info!(
                job = %report.job_name,
                run_id = %report.run_id,
                rows = summary.total_rows(),
                "run succeeded"
            ),
            RunOutcome::AlreadyInProgress => warn!(
                job = %report.job_name,
                run_id = %report.run_id,
                "run skipped: job already in progress"
            ),
            RunOutcome::Failed(e) => error!(
                job = %report.job_name,
                run_id = %report.run_id,
                error = %e,
                "run failed"
            ),
        },
        Err(e @ (RunError::JobNotFound(_) | RunError::JobInactive(_))) => {
            error!(error = %e, "job is not active or not found");
        }
        Err(e) => error!(error = %e, "run aborted"),
    }
}
