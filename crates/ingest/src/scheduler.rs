//! Cron-driven daemon mode.
//!
//! Sleeps until the next fire time of the schedule, runs one orchestrator
//! attempt, and repeats. Attempts never overlap within the process because
//! each one is awaited; across processes the job's `in_progress` flag applies.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tracing::{info, warn};

use crate::orchestrator::{log_run_result, Orchestrator};

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow), but schedules
/// are usually written with 5 (min hr dom mon dow).
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        let six_field = format!("0 {}", expr);
        Schedule::from_str(&six_field)
    } else {
        Schedule::from_str(expr)
    }
}

/// Time from now until the schedule's next fire, or `None` if it never fires again.
pub fn until_next_fire(schedule: &Schedule) -> Option<Duration> {
    let next = schedule.upcoming(Utc).next()?;
    Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Run the orchestrator on every fire of `schedule` until `shutdown` resolves.
pub async fn run_scheduled<F>(orchestrator: &Orchestrator, schedule: Schedule, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(job = %orchestrator.job_name(), "ingestion scheduler started");

    loop {
        let Some(wait) = until_next_fire(&schedule) else {
            warn!("schedule has no upcoming fire times, scheduler stopping");
            return;
        };
        info!(in_secs = wait.as_secs(), "next ingestion run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("ingestion scheduler shutting down");
                return;
            }
        }

        let result = orchestrator.run().await;
        log_run_result(&result);
    }
}
