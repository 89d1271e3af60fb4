//! Run lifecycle of a scheduled job: `Idle --start--> InProgress --stop--> Idle`.
//!
//! The `in_progress` flag is the only guard against overlapping runs, so the
//! check-and-set is delegated to a single atomic store operation. Starting
//! yields an [`ActiveRun`] that can only be consumed by [`RunLifecycle::stop`].

use tracing::{info, warn};

use epistat_core::now_seconds;
use epistat_storage::{ScheduledJob, StatsStore, StoreError};

use crate::error::RunError;

#[derive(Debug)]
pub enum StartOutcome {
    Started(ActiveRun),
    /// Another run holds the flag. Nothing was mutated.
    AlreadyInProgress(ScheduledJob),
}

/// Proof that this process set `in_progress`. Must be handed back to `stop`.
#[derive(Debug)]
#[must_use = "a started run must be stopped or the job stays in progress"]
pub struct ActiveRun {
    job: ScheduledJob,
}

impl ActiveRun {
    pub fn job(&self) -> &ScheduledJob {
        &self.job
    }
}

pub struct RunLifecycle<'a> {
    store: &'a dyn StatsStore,
}

impl<'a> RunLifecycle<'a> {
    pub fn new(store: &'a dyn StatsStore) -> Self {
        Self { store }
    }

    /// The job if it exists and is active.
    pub async fn eligible_job(&self, name: &str) -> Result<ScheduledJob, RunError> {
        if let Some(job) = self.store.find_active_job(name).await? {
            return Ok(job);
        }
        match self.store.get_job(name).await? {
            Some(_) => Err(RunError::JobInactive(name.to_string())),
            None => Err(RunError::JobNotFound(name.to_string())),
        }
    }

    pub async fn try_start(&self, job: ScheduledJob) -> Result<StartOutcome, RunError> {
        if let Some(started) = self.store.try_begin_job(&job.name).await? {
            info!(job = %started.name, "job marked in progress");
            return Ok(StartOutcome::Started(ActiveRun { job: started }));
        }

        // The atomic update matched nothing: either another run held the flag
        // (and may have released it since) or the job was deactivated or removed.
        match self.store.get_job(&job.name).await? {
            Some(current) if current.active => {
                warn!(
                    job = %current.name,
                    in_progress = current.in_progress,
                    "job already in progress"
                );
                Ok(StartOutcome::AlreadyInProgress(current))
            }
            Some(_) => Err(RunError::JobInactive(job.name)),
            None => Err(RunError::JobNotFound(job.name)),
        }
    }

    /// Return the job to idle. On success `last_success` is set to now.
    pub async fn stop(&self, run: ActiveRun, succeeded: bool) -> Result<(), StoreError> {
        let last_success = succeeded.then(now_seconds);
        self.store.finish_job(&run.job.name, last_success).await?;
        info!(job = %run.job.name, succeeded, "job returned to idle");
        Ok(())
    }
}
