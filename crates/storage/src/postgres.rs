//! PostgreSQL backend.
//!
//! [`PgStore`] owns a connection pool. Each trait method runs one statement
//! on the pool (auto-commit), except the bulk fact appends which chunk their
//! rows inside a single transaction so a fact group lands all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use epistat_core::config::PostgresConfig;
use epistat_core::{AgeRange, AggregateStats};

use crate::error::StoreError;
use crate::model::{
    AgeFact, CaseOrigin, CityFact, FactStamp, GenderSplit, HistoryEntry, NewHistoryEntry,
    ScheduledJob, TotalsRecord,
};
use crate::store::StatsStore;

/// Rows per INSERT in bulk appends. Keeps bind parameters well under the
/// protocol limit of 65535 per statement.
const BULK_CHUNK_ROWS: usize = 1000;

const JOB_COLUMNS: &str = "id, name, active, in_progress, last_success";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the configured pool limits and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    /// Close every pooled connection. Waits for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    run_id: Uuid,
    job_name: String,
    status: String,
    message: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryEntry {
            id: row.id,
            run_id: row.run_id,
            job_name: row.job_name,
            status: row.status.parse()?,
            message: row.message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[async_trait]
impl StatsStore for PgStore {
    async fn get_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let job = sqlx::query_as::<_, ScheduledJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn find_active_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let job = sqlx::query_as::<_, ScheduledJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = $1 AND active"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn try_begin_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        // Check-and-set in one statement: concurrent callers serialise on the row lock
        // and only one sees `NOT in_progress`.
        let job = sqlx::query_as::<_, ScheduledJob>(&format!(
            "UPDATE scheduled_jobs SET in_progress = TRUE
             WHERE name = $1 AND active AND NOT in_progress
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn finish_job(
        &self,
        name: &str,
        last_success: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs
             SET in_progress = FALSE, last_success = COALESCE($2, last_success)
             WHERE name = $1",
        )
        .bind(name)
        .bind(last_success)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn set_job_active(&self, name: &str, active: bool) -> Result<ScheduledJob, StoreError> {
        let job = sqlx::query_as::<_, ScheduledJob>(&format!(
            "INSERT INTO scheduled_jobs (name, active) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET active = EXCLUDED.active
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(name)
        .bind(active)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    async fn reset_job(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE scheduled_jobs SET in_progress = FALSE WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO run_history (run_id, job_name, status, message, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.run_id)
        .bind(&entry.job_name)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_history(
        &self,
        job_name: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, run_id, job_name, status, message, started_at, finished_at
             FROM run_history
             WHERE job_name = $1
             ORDER BY id DESC
             LIMIT $2",
        )
        .bind(job_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn resolve_city(&self, name: &str) -> Result<i64, StoreError> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM cities WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO cities (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            debug!(city = %name, id, "new city");
            return Ok(id);
        }

        // Lost an insert race; the winner's row is visible now.
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM cities WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn resolve_age_bucket(&self, range: &AgeRange) -> Result<i64, StoreError> {
        const SELECT_BUCKET: &str = "SELECT id FROM age_buckets
             WHERE lower_bound IS NOT DISTINCT FROM $1 AND upper_bound = $2 AND unit = $3";

        let existing = sqlx::query_scalar::<_, i64>(SELECT_BUCKET)
            .bind(range.lower)
            .bind(range.upper)
            .bind(range.unit.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO age_buckets (lower_bound, upper_bound, unit) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(range.lower)
        .bind(range.upper)
        .bind(range.unit.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            debug!(bucket = %range, id, "new age bucket");
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, i64>(SELECT_BUCKET)
            .bind(range.lower)
            .bind(range.upper)
            .bind(range.unit.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_totals(
        &self,
        stats: &AggregateStats,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO totals (confirmed_cases, recovered_cases, suspected_cases, deaths,
                                 monitored_cases, updated, added)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(stats.confirmed)
        .bind(stats.recovered)
        .bind(stats.suspected)
        .bind(stats.deaths)
        .bind(stats.monitored)
        .bind(stamp.updated)
        .bind(stamp.added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_gender_split(
        &self,
        split: &GenderSplit,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cases_by_gender (male_cases, female_cases, updated, added)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(split.male_cases)
        .bind(split.female_cases)
        .bind(stamp.updated)
        .bind(stamp.added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_pregnancy_cases(&self, cases: i64, stamp: FactStamp) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO cases_pregnant (cases, updated, added) VALUES ($1, $2, $3)")
            .bind(cases)
            .bind(stamp.updated)
            .bind(stamp.added)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_case_origin(
        &self,
        origin: &CaseOrigin,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cases_by_origin (local_cases, imported_cases, updated, added)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(origin.local_cases)
        .bind(origin.imported_cases)
        .bind(stamp.updated)
        .bind(stamp.added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_city_facts(
        &self,
        rows: &[CityFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(BULK_CHUNK_ROWS) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO cases_by_city (city_id, confirmed_cases, recovered_cases,
                                            monitored_cases, deaths, updated, added) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.city_id)
                    .push_bind(row.confirmed)
                    .push_bind(row.recovered)
                    .push_bind(row.monitored)
                    .push_bind(row.deaths)
                    .push_bind(stamp.updated)
                    .push_bind(stamp.added);
            });
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn insert_age_facts(
        &self,
        rows: &[AgeFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(BULK_CHUNK_ROWS) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO cases_by_age (age_bucket_id, cases, updated, added) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.age_bucket_id)
                    .push_bind(row.cases)
                    .push_bind(stamp.updated)
                    .push_bind(stamp.added);
            });
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn latest_totals(&self) -> Result<Option<TotalsRecord>, StoreError> {
        let row = sqlx::query_as::<_, TotalsRecord>(
            "SELECT id, confirmed_cases, recovered_cases, suspected_cases, deaths,
                    monitored_cases, updated, added
             FROM totals
             ORDER BY id DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
