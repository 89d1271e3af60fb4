//! The storage contract shared by the Postgres and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use epistat_core::{AgeRange, AggregateStats};

use crate::error::StoreError;
use crate::model::{
    AgeFact, CaseOrigin, CityFact, FactStamp, GenderSplit, HistoryEntry, NewHistoryEntry,
    ScheduledJob, TotalsRecord,
};

/// Every statement is committed on its own. Callers that need several
/// writes to land together must not rely on this trait for it.
#[async_trait]
pub trait StatsStore: Send + Sync {
    // ── Scheduled jobs ───────────────────────────────────────────

    /// Fetch a job by name regardless of its `active` flag.
    async fn get_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError>;

    /// Fetch a job only if it exists and is active.
    async fn find_active_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError>;

    /// Atomically flip `in_progress` from false to true on an active job.
    ///
    /// Returns the updated job, or `None` when the job is already in
    /// progress (or vanished / was deactivated in the meantime).
    async fn try_begin_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError>;

    /// Clear `in_progress`; when `last_success` is given it is stored too.
    async fn finish_job(
        &self,
        name: &str,
        last_success: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Create the job if missing, then set its `active` flag.
    async fn set_job_active(&self, name: &str, active: bool) -> Result<ScheduledJob, StoreError>;

    /// Clear a stuck `in_progress` flag. Returns false if the job does not exist.
    async fn reset_job(&self, name: &str) -> Result<bool, StoreError>;

    // ── Run history ──────────────────────────────────────────────

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_history(&self, job_name: &str, limit: i64)
        -> Result<Vec<HistoryEntry>, StoreError>;

    // ── Dimensions ───────────────────────────────────────────────

    /// Id of the city with this exact name, inserting it on first sight.
    async fn resolve_city(&self, name: &str) -> Result<i64, StoreError>;

    /// Id of the bucket with this `(lower, upper, unit)` key, inserting it on
    /// first sight. A missing lower bound matches only buckets without one.
    async fn resolve_age_bucket(&self, range: &AgeRange) -> Result<i64, StoreError>;

    // ── Facts ────────────────────────────────────────────────────

    async fn insert_totals(&self, stats: &AggregateStats, stamp: FactStamp)
        -> Result<(), StoreError>;

    async fn insert_gender_split(&self, split: &GenderSplit, stamp: FactStamp)
        -> Result<(), StoreError>;

    async fn insert_pregnancy_cases(&self, cases: i64, stamp: FactStamp) -> Result<(), StoreError>;

    async fn insert_case_origin(&self, origin: &CaseOrigin, stamp: FactStamp)
        -> Result<(), StoreError>;

    /// Bulk append; returns the number of rows written.
    async fn insert_city_facts(&self, rows: &[CityFact], stamp: FactStamp)
        -> Result<u64, StoreError>;

    /// Bulk append; returns the number of rows written.
    async fn insert_age_facts(&self, rows: &[AgeFact], stamp: FactStamp)
        -> Result<u64, StoreError>;

    // ── Reads ────────────────────────────────────────────────────

    async fn latest_totals(&self) -> Result<Option<TotalsRecord>, StoreError>;
}
