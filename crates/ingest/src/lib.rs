//! Scheduled ingestion of epidemiological statistics.
//!
//! - [`provider`]: the statistics source seam ([`StatsProvider`] / [`StatsSession`])
//! - [`http_provider`]: JSON-over-HTTP source
//! - [`resolver`]: dimension id resolution (cities, age buckets)
//! - [`writer`]: per-group fact appends
//! - [`lifecycle`] / [`history`]: job start/stop and run history
//! - [`orchestrator`]: one full attempt
//! - [`scheduler`]: cron-driven daemon loop

pub mod error;
pub mod history;
pub mod http_provider;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod resolver;
pub mod scheduler;
pub mod writer;

pub use error::{FactGroup, GroupFailure, IngestError, ProviderError, RunError};
pub use history::HistoryRecorder;
pub use http_provider::HttpStatsProvider;
pub use lifecycle::{ActiveRun, RunLifecycle, StartOutcome};
pub use orchestrator::{log_run_result, Orchestrator, RunOutcome, RunReport};
pub use provider::{fetch_snapshot, StatsProvider, StatsSession};
pub use resolver::ReferenceResolver;
pub use writer::{StatWriter, WriteSummary};
