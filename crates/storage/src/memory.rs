//! In-process backend with the same contract as [`PgStore`](crate::PgStore).
//!
//! All tables live behind one mutex, so every trait method is atomic the way a
//! single SQL statement is. Used for tests and for wiring the pipeline without
//! a database.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use epistat_core::{AgeRange, AggregateStats};

use crate::error::StoreError;
use crate::model::{
    AgeBucket, AgeFact, CaseOrigin, City, CityFact, FactStamp, GenderSplit, HistoryEntry,
    NewHistoryEntry, ScheduledJob, TotalsRecord,
};
use crate::store::StatsStore;

/// A fact row together with its timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFact<T> {
    pub fact: T,
    pub stamp: FactStamp,
}

/// Full copy of every table, for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub jobs: Vec<ScheduledJob>,
    pub history: Vec<HistoryEntry>,
    pub cities: Vec<City>,
    pub age_buckets: Vec<AgeBucket>,
    pub totals: Vec<StoredFact<AggregateStats>>,
    pub gender: Vec<StoredFact<GenderSplit>>,
    pub pregnancy: Vec<StoredFact<i64>>,
    pub origin: Vec<StoredFact<CaseOrigin>>,
    pub city_facts: Vec<StoredFact<CityFact>>,
    pub age_facts: Vec<StoredFact<AgeFact>>,
}

impl MemoryTables {
    /// Number of fact rows across all six fact tables.
    pub fn fact_row_count(&self) -> usize {
        self.totals.len()
            + self.gender.len()
            + self.pregnancy.len()
            + self.origin.len()
            + self.city_facts.len()
            + self.age_facts.len()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job row directly, bypassing the lifecycle.
    pub fn put_job(&self, name: &str, active: bool, in_progress: bool) -> ScheduledJob {
        let mut t = self.lock();
        if let Some(job) = t.jobs.iter_mut().find(|j| j.name == name) {
            job.active = active;
            job.in_progress = in_progress;
            return job.clone();
        }
        let job = ScheduledJob {
            id: next_id(t.jobs.len()),
            name: name.to_string(),
            active,
            in_progress,
            last_success: None,
        };
        t.jobs.push(job.clone());
        job
    }

    pub fn tables(&self) -> MemoryTables {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_id(len: usize) -> i64 {
    len as i64 + 1
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn get_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(self.lock().jobs.iter().find(|j| j.name == name).cloned())
    }

    async fn find_active_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .iter()
            .find(|j| j.name == name && j.active)
            .cloned())
    }

    async fn try_begin_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let mut t = self.lock();
        match t
            .jobs
            .iter_mut()
            .find(|j| j.name == name && j.active && !j.in_progress)
        {
            Some(job) => {
                job.in_progress = true;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn finish_job(
        &self,
        name: &str,
        last_success: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut t = self.lock();
        let job = t
            .jobs
            .iter_mut()
            .find(|j| j.name == name)
            .ok_or_else(|| StoreError::JobNotFound(name.to_string()))?;
        job.in_progress = false;
        if last_success.is_some() {
            job.last_success = last_success;
        }
        Ok(())
    }

    async fn set_job_active(&self, name: &str, active: bool) -> Result<ScheduledJob, StoreError> {
        let mut t = self.lock();
        if let Some(job) = t.jobs.iter_mut().find(|j| j.name == name) {
            job.active = active;
            return Ok(job.clone());
        }
        let job = ScheduledJob {
            id: next_id(t.jobs.len()),
            name: name.to_string(),
            active,
            in_progress: false,
            last_success: None,
        };
        t.jobs.push(job.clone());
        Ok(job)
    }

    async fn reset_job(&self, name: &str) -> Result<bool, StoreError> {
        let mut t = self.lock();
        match t.jobs.iter_mut().find(|j| j.name == name) {
            Some(job) => {
                job.in_progress = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), StoreError> {
        let mut t = self.lock();
        let id = next_id(t.history.len());
        t.history.push(HistoryEntry {
            id,
            run_id: entry.run_id,
            job_name: entry.job_name.clone(),
            status: entry.status,
            message: entry.message.clone(),
            started_at: entry.started_at,
            finished_at: entry.finished_at,
        });
        Ok(())
    }

    async fn recent_history(
        &self,
        job_name: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .history
            .iter()
            .rev()
            .filter(|h| h.job_name == job_name)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resolve_city(&self, name: &str) -> Result<i64, StoreError> {
        let mut t = self.lock();
        if let Some(city) = t.cities.iter().find(|c| c.name == name) {
            return Ok(city.id);
        }
        let id = next_id(t.cities.len());
        t.cities.push(City { id, name: name.to_string() });
        Ok(id)
    }

    async fn resolve_age_bucket(&self, range: &AgeRange) -> Result<i64, StoreError> {
        let mut t = self.lock();
        if let Some(bucket) = t.age_buckets.iter().find(|b| {
            b.lower_bound == range.lower && b.upper_bound == range.upper && b.unit == range.unit
        }) {
            return Ok(bucket.id);
        }
        let id = next_id(t.age_buckets.len());
        t.age_buckets.push(AgeBucket {
            id,
            lower_bound: range.lower,
            upper_bound: range.upper,
            unit: range.unit,
        });
        Ok(id)
    }

    async fn insert_totals(
        &self,
        stats: &AggregateStats,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.lock().totals.push(StoredFact { fact: *stats, stamp });
        Ok(())
    }

    async fn insert_gender_split(
        &self,
        split: &GenderSplit,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.lock().gender.push(StoredFact { fact: *split, stamp });
        Ok(())
    }

    async fn insert_pregnancy_cases(&self, cases: i64, stamp: FactStamp) -> Result<(), StoreError> {
        self.lock().pregnancy.push(StoredFact { fact: cases, stamp });
        Ok(())
    }

    async fn insert_case_origin(
        &self,
        origin: &CaseOrigin,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.lock().origin.push(StoredFact { fact: *origin, stamp });
        Ok(())
    }

    async fn insert_city_facts(
        &self,
        rows: &[CityFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        let mut t = self.lock();
        if let Some(bad) = rows.iter().find(|r| !t.cities.iter().any(|c| c.id == r.city_id)) {
            return Err(StoreError::InvalidRow(format!("unknown city id {}", bad.city_id)));
        }
        t.city_facts
            .extend(rows.iter().map(|fact| StoredFact { fact: *fact, stamp }));
        Ok(rows.len() as u64)
    }

    async fn insert_age_facts(
        &self,
        rows: &[AgeFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        let mut t = self.lock();
        if let Some(bad) = rows
            .iter()
            .find(|r| !t.age_buckets.iter().any(|b| b.id == r.age_bucket_id))
        {
            return Err(StoreError::InvalidRow(format!(
                "unknown age bucket id {}",
                bad.age_bucket_id
            )));
        }
        t.age_facts
            .extend(rows.iter().map(|fact| StoredFact { fact: *fact, stamp }));
        Ok(rows.len() as u64)
    }

    async fn latest_totals(&self) -> Result<Option<TotalsRecord>, StoreError> {
        let t = self.lock();
        Ok(t.totals.iter().enumerate().last().map(|(idx, row)| TotalsRecord {
            id: next_id(idx),
            confirmed_cases: row.fact.confirmed,
            recovered_cases: row.fact.recovered,
            suspected_cases: row.fact.suspected,
            deaths: row.fact.deaths,
            monitored_cases: row.fact.monitored,
            updated: row.stamp.updated,
            added: row.stamp.added,
        }))
    }
}
