//! Error types for fetching, writing and running an ingestion job.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use epistat_core::CoreError;
use epistat_storage::StoreError;

/// The six independently committed fact groups of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactGroup {
    Totals,
    GenderSplit,
    Pregnancy,
    CaseOrigin,
    Cities,
    AgeBuckets,
}

impl FactGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totals => "totals",
            Self::GenderSplit => "gender_split",
            Self::Pregnancy => "pregnancy",
            Self::CaseOrigin => "case_origin",
            Self::Cities => "cities",
            Self::AgeBuckets => "age_buckets",
        }
    }
}

impl fmt::Display for FactGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("invalid payload for '{resource}': {reason}")]
    InvalidPayload { resource: String, reason: String },

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// One fact group that failed to persist.
#[derive(Debug)]
pub struct GroupFailure {
    pub group: FactGroup,
    pub error: StoreError,
}

impl fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.group, self.error)
    }
}

fn join_failures(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why an ingestion attempt failed after the job was started.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("snapshot fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("snapshot fetch timed out after {}s", .0.as_secs_f64())]
    FetchTimeout(Duration),

    #[error("failed to write fact groups: {}", join_failures(.0))]
    GroupWrites(Vec<GroupFailure>),
}

impl IngestError {
    /// Groups that failed to persist (empty for fetch failures).
    pub fn failed_groups(&self) -> Vec<FactGroup> {
        match self {
            Self::GroupWrites(failures) => failures.iter().map(|f| f.group).collect(),
            _ => Vec::new(),
        }
    }
}

/// Orchestrator errors that prevent a run from being attempted at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("scheduled job '{0}' not found")]
    JobNotFound(String),

    #[error("scheduled job '{0}' is not active")]
    JobInactive(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
