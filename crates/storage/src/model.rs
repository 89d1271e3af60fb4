//! Row types for the jobs, history, dimension and fact tables.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use epistat_core::AgeUnit;

use crate::error::StoreError;

// ── Scheduled jobs ───────────────────────────────────────────────────

/// A named ingestion job. Created administratively, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub in_progress: bool,
    pub last_success: Option<DateTime<Utc>>,
}

// ── Run history ──────────────────────────────────────────────────────

/// Terminal outcome of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Failed,
    Succeeded,
    Warning,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "succeeded" => Ok(Self::Succeeded),
            "warning" => Ok(Self::Warning),
            other => Err(StoreError::InvalidRow(format!("unknown run status '{}'", other))),
        }
    }
}

/// History row to append. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub run_id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub run_id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ── Dimensions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct City {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeBucket {
    pub id: i64,
    pub lower_bound: Option<i32>,
    pub upper_bound: i32,
    pub unit: AgeUnit,
}

// ── Facts ────────────────────────────────────────────────────────────

/// Timestamps carried by every fact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactStamp {
    /// When the source last refreshed the data.
    pub updated: DateTime<Utc>,
    /// When this row was ingested.
    pub added: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenderSplit {
    pub male_cases: i64,
    pub female_cases: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaseOrigin {
    pub local_cases: i64,
    pub imported_cases: i64,
}

/// Per-city counts with the city already resolved to its surrogate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CityFact {
    pub city_id: i64,
    pub confirmed: i64,
    pub recovered: i64,
    pub monitored: i64,
    pub deaths: i64,
}

/// Per-age-bucket case count with the bucket already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgeFact {
    pub age_bucket_id: i64,
    pub cases: i64,
}

/// Most recent row of the `totals` table, as served by the read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TotalsRecord {
    pub id: i64,
    pub confirmed_cases: i64,
    pub recovered_cases: i64,
    pub suspected_cases: i64,
    pub deaths: i64,
    pub monitored_cases: i64,
    pub updated: DateTime<Utc>,
    pub added: DateTime<Utc>,
}
