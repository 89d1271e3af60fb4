//! epistat-cron: runs the statistics ingestion job.
//!
//! `run` (the default) makes a single attempt and exits, for an external
//! scheduler. `schedule` stays resident and fires on a cron expression.
//! `job ...` covers the administrative side of the `scheduled_jobs` table.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use epistat_core::config::{load_dotenv, Config};
use epistat_ingest::scheduler::{parse_cron, run_scheduled};
use epistat_ingest::{log_run_result, HttpStatsProvider, Orchestrator};
use epistat_storage::{PgStore, StatsStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Scheduled ingestion of epidemiological statistics.
#[derive(Parser, Debug)]
#[command(name = "epistat-cron", version, about)]
struct Cli {
    /// Job name in `scheduled_jobs` (overrides CRON_JOB_NAME).
    #[arg(long, global = true)]
    job: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make one ingestion attempt and exit.
    Run,
    /// Run on a cron schedule until interrupted.
    Schedule {
        /// 5- or 6-field cron expression (overrides CRON_SCHEDULE).
        #[arg(long)]
        cron: Option<String>,
    },
    /// Administer scheduled jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Create the job if needed and mark it active.
    Enable { name: String },
    /// Mark the job inactive; it will not start until re-enabled.
    Disable { name: String },
    /// Clear a stuck in-progress flag left by a crashed run.
    Reset { name: String },
    /// Show the most recent run history rows.
    History {
        name: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let mut config = Config::from_env();
    if let Some(job) = cli.job {
        config.cron.job_name = job;
    }
    config.log_summary();

    let store = Arc::new(
        PgStore::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?,
    );

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_once(&config, store.clone()).await,
        Command::Schedule { cron } => run_schedule(&config, store.clone(), cron).await,
        Command::Job { action } => administer(store.as_ref(), action).await,
    };

    store.close().await;
    result
}

fn build_orchestrator(config: &Config, store: Arc<PgStore>) -> Result<Orchestrator> {
    let provider = HttpStatsProvider::from_config(&config.provider)
        .context("statistics source is not configured")?;
    Ok(Orchestrator::new(store, Arc::new(provider), &config.cron))
}

/// Every outcome, failures included, ends the process normally.
async fn run_once(config: &Config, store: Arc<PgStore>) -> Result<()> {
    let orchestrator = build_orchestrator(config, store)?;
    let result = orchestrator.run().await;
    log_run_result(&result);
    Ok(())
}

async fn run_schedule(config: &Config, store: Arc<PgStore>, cron: Option<String>) -> Result<()> {
    let expr = cron
        .or_else(|| config.cron.schedule.clone())
        .context("no schedule given: pass --cron or set CRON_SCHEDULE")?;
    let schedule =
        parse_cron(&expr).with_context(|| format!("invalid cron expression '{}'", expr))?;
    let orchestrator = build_orchestrator(config, store)?;

    run_scheduled(&orchestrator, schedule, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await;
    Ok(())
}

async fn administer(store: &dyn StatsStore, action: JobAction) -> Result<()> {
    match action {
        JobAction::Enable { name } => {
            let job = store.set_job_active(&name, true).await?;
            info!(job = %job.name, in_progress = job.in_progress, "job enabled");
        }
        JobAction::Disable { name } => {
            let job = store.set_job_active(&name, false).await?;
            info!(job = %job.name, "job disabled");
        }
        JobAction::Reset { name } => {
            if store.reset_job(&name).await? {
                info!(job = %name, "in-progress flag cleared");
            } else {
                error!(job = %name, "job not found");
            }
        }
        JobAction::History { name, limit } => {
            let rows = store.recent_history(&name, limit).await?;
            if rows.is_empty() {
                println!("no history for job '{}'", name);
            }
            for row in rows {
                println!(
                    "{}  {:<9}  {} -> {}  {}",
                    row.run_id,
                    row.status.as_str(),
                    row.started_at.format("%Y-%m-%d %H:%M:%S"),
                    row.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    row.message.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}
