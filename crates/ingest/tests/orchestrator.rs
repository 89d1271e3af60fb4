//! End-to-end runs of the orchestrator against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use epistat_core::config::CronConfig;
use epistat_core::{AgeBucketStat, AgeRange, AgeUnit, AggregateStats, BreakdownStats, CityStat, Snapshot};
use epistat_ingest::{
    FactGroup, IngestError, Orchestrator, ProviderError, RunError, RunOutcome, StatsProvider,
    StatsSession,
};
use epistat_storage::{
    AgeFact, CaseOrigin, CityFact, FactStamp, GenderSplit, HistoryEntry, MemoryStore,
    NewHistoryEntry, RunStatus, ScheduledJob, StatsStore, StoreError, TotalsRecord,
};

const JOB: &str = "stats-job";

// ── Fake source ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Aggregate,
    LastUpdate,
    Breakdown,
    Ages,
    Cities,
}

#[derive(Clone)]
struct FakeProvider {
    snapshot: Snapshot,
    fail_at: Option<Step>,
    hang_at: Option<Step>,
    /// Signalled once a session has been opened.
    entered: Arc<Notify>,
    /// When set, the first call waits for this before answering.
    gate: Option<Arc<Notify>>,
    open_sessions: Arc<AtomicUsize>,
    sessions_opened: Arc<AtomicUsize>,
}

impl FakeProvider {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            fail_at: None,
            hang_at: None,
            entered: Arc::new(Notify::new()),
            gate: None,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            sessions_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    fn hanging_at(mut self, step: Step) -> Self {
        self.hang_at = Some(step);
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsProvider for FakeProvider {
    async fn open_session(&self) -> Result<Box<dyn StatsSession>, ProviderError> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        Ok(Box::new(FakeSession {
            provider: self.clone(),
        }))
    }
}

struct FakeSession {
    provider: FakeProvider,
}

impl FakeSession {
    async fn step(&mut self, step: Step) -> Result<(), ProviderError> {
        if let Some(gate) = self.provider.gate.take() {
            gate.notified().await;
        }
        if self.provider.hang_at == Some(step) {
            std::future::pending::<()>().await;
        }
        if self.provider.fail_at == Some(step) {
            return Err(ProviderError::Unavailable(format!("{:?} endpoint down", step)));
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.provider.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatsSession for FakeSession {
    async fn aggregate_stats(&mut self) -> Result<AggregateStats, ProviderError> {
        self.step(Step::Aggregate).await?;
        Ok(self.provider.snapshot.aggregate)
    }

    async fn last_update(&mut self) -> Result<DateTime<Utc>, ProviderError> {
        self.step(Step::LastUpdate).await?;
        Ok(self.provider.snapshot.updated)
    }

    async fn breakdown_stats(&mut self) -> Result<BreakdownStats, ProviderError> {
        self.step(Step::Breakdown).await?;
        Ok(self.provider.snapshot.breakdown)
    }

    async fn stats_by_age_bucket(&mut self) -> Result<Vec<AgeBucketStat>, ProviderError> {
        self.step(Step::Ages).await?;
        Ok(self.provider.snapshot.by_age.clone())
    }

    async fn stats_by_city(&mut self) -> Result<Vec<CityStat>, ProviderError> {
        self.step(Step::Cities).await?;
        Ok(self.provider.snapshot.by_city.clone())
    }
}

// ── Store with an injected fault ────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    /// `insert_city_facts` always fails.
    CityFactsDown,
    /// A losing `try_begin_job` is followed by the holder finishing its run,
    /// so the re-read sees an active, idle job.
    HolderFinishesAfterBegin,
}

struct FaultyStore(MemoryStore, Fault);

#[async_trait]
impl StatsStore for FaultyStore {
    async fn get_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        self.0.get_job(name).await
    }
    async fn find_active_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        self.0.find_active_job(name).await
    }
    async fn try_begin_job(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let started = self.0.try_begin_job(name).await?;
        if started.is_none() && self.1 == Fault::HolderFinishesAfterBegin {
            self.0.finish_job(name, None).await?;
        }
        Ok(started)
    }
    async fn finish_job(
        &self,
        name: &str,
        last_success: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.0.finish_job(name, last_success).await
    }
    async fn set_job_active(&self, name: &str, active: bool) -> Result<ScheduledJob, StoreError> {
        self.0.set_job_active(name, active).await
    }
    async fn reset_job(&self, name: &str) -> Result<bool, StoreError> {
        self.0.reset_job(name).await
    }
    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), StoreError> {
        self.0.append_history(entry).await
    }
    async fn recent_history(
        &self,
        job_name: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        self.0.recent_history(job_name, limit).await
    }
    async fn resolve_city(&self, name: &str) -> Result<i64, StoreError> {
        self.0.resolve_city(name).await
    }
    async fn resolve_age_bucket(&self, range: &AgeRange) -> Result<i64, StoreError> {
        self.0.resolve_age_bucket(range).await
    }
    async fn insert_totals(
        &self,
        stats: &AggregateStats,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.0.insert_totals(stats, stamp).await
    }
    async fn insert_gender_split(
        &self,
        split: &GenderSplit,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.0.insert_gender_split(split, stamp).await
    }
    async fn insert_pregnancy_cases(&self, cases: i64, stamp: FactStamp) -> Result<(), StoreError> {
        self.0.insert_pregnancy_cases(cases, stamp).await
    }
    async fn insert_case_origin(
        &self,
        origin: &CaseOrigin,
        stamp: FactStamp,
    ) -> Result<(), StoreError> {
        self.0.insert_case_origin(origin, stamp).await
    }
    async fn insert_city_facts(
        &self,
        rows: &[CityFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        if self.1 == Fault::CityFactsDown {
            return Err(StoreError::InvalidRow("cases_by_city is read-only".to_string()));
        }
        self.0.insert_city_facts(rows, stamp).await
    }
    async fn insert_age_facts(
        &self,
        rows: &[AgeFact],
        stamp: FactStamp,
    ) -> Result<u64, StoreError> {
        self.0.insert_age_facts(rows, stamp).await
    }
    async fn latest_totals(&self) -> Result<Option<TotalsRecord>, StoreError> {
        self.0.latest_totals().await
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn source_updated() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 4, 1, 13, 0, 0).unwrap()
}

fn snapshot() -> Snapshot {
    Snapshot {
        aggregate: AggregateStats {
            confirmed: 100,
            recovered: 50,
            suspected: 10,
            deaths: 2,
            monitored: 5,
        },
        updated: source_updated(),
        breakdown: BreakdownStats {
            men_cases: 40,
            women_cases: 60,
            pregnant_cases: 1,
            local_cases: 70,
            imported_cases: 30,
        },
        by_age: vec![
            AgeBucketStat {
                range_label: "20-29".to_string(),
                bucket_type: AgeUnit::Years,
                case_count: 12,
            },
            AgeBucketStat {
                range_label: "unknown".to_string(),
                bucket_type: AgeUnit::Years,
                case_count: 3,
            },
        ],
        by_city: vec![CityStat {
            city_name: "Metropolis".to_string(),
            confirmed: 10,
            recovered: 5,
            monitored: 1,
            deaths: 0,
        }],
    }
}

fn orchestrator(store: Arc<dyn StatsStore>, provider: &FakeProvider) -> Orchestrator {
    Orchestrator::new(store, Arc::new(provider.clone()), &CronConfig::default())
}

fn idle_job_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_job(JOB, true, false);
    store
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_successful_run_persists_snapshot() {
    let store = idle_job_store();
    let provider = FakeProvider::new(snapshot());

    let report = orchestrator(store.clone(), &provider).run().await.unwrap();
    let RunOutcome::Succeeded(summary) = &report.outcome else {
        panic!("expected success, got {:?}", report.outcome);
    };
    assert_eq!(summary.rows_for(FactGroup::Cities), Some(1));
    assert_eq!(summary.skipped_age_labels, vec!["unknown".to_string()]);

    let t = store.tables();
    assert_eq!(t.totals.len(), 1);
    assert_eq!(t.totals[0].fact, snapshot().aggregate);
    assert_eq!(t.totals[0].stamp.updated, source_updated());

    assert_eq!(t.cities.len(), 1);
    assert_eq!(t.cities[0].name, "Metropolis");
    assert_eq!(t.city_facts.len(), 1);
    let city_fact = t.city_facts[0].fact;
    assert_eq!(city_fact.city_id, t.cities[0].id);
    assert_eq!((city_fact.confirmed, city_fact.recovered, city_fact.monitored, city_fact.deaths), (10, 5, 1, 0));

    assert_eq!(t.gender[0].fact, GenderSplit { male_cases: 40, female_cases: 60 });
    assert_eq!(t.pregnancy[0].fact, 1);
    assert_eq!(t.origin[0].fact, CaseOrigin { local_cases: 70, imported_cases: 30 });
    assert_eq!(t.age_facts.len(), 1);
    assert_eq!(t.age_buckets[0].lower_bound, Some(20));

    let job = &t.jobs[0];
    assert!(!job.in_progress);
    assert!(job.last_success.is_some());

    assert_eq!(t.history.len(), 1);
    assert_eq!(t.history[0].status, RunStatus::Succeeded);
    assert_eq!(t.history[0].run_id, report.run_id);
    assert_eq!(t.history[0].job_name, JOB);
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test]
async fn test_second_run_reuses_dimension_rows() {
    let store = idle_job_store();
    let provider = FakeProvider::new(snapshot());
    let orchestrator = orchestrator(store.clone(), &provider);

    orchestrator.run().await.unwrap();
    orchestrator.run().await.unwrap();

    let t = store.tables();
    assert_eq!(t.cities.len(), 1);
    assert_eq!(t.age_buckets.len(), 1);
    assert_eq!(t.city_facts.len(), 2);
    assert_eq!(t.totals.len(), 2);
    assert_eq!(t.history.len(), 2);
}

#[tokio::test]
async fn test_provider_failure_mid_fetch_writes_nothing() {
    let store = idle_job_store();
    let provider = FakeProvider::new(snapshot()).failing_at(Step::Breakdown);

    let report = orchestrator(store.clone(), &provider).run().await.unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(IngestError::Fetch(ProviderError::Unavailable(_)))
    ));

    let t = store.tables();
    assert_eq!(t.fact_row_count(), 0);
    assert!(t.cities.is_empty());
    assert!(!t.jobs[0].in_progress);
    assert!(t.jobs[0].last_success.is_none());
    assert_eq!(t.history.len(), 1);
    assert_eq!(t.history[0].status, RunStatus::Failed);
    assert!(t.history[0]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("Breakdown endpoint down")));
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test]
async fn test_already_in_progress_records_warning() {
    let store = Arc::new(MemoryStore::new());
    store.put_job(JOB, true, true);
    let provider = FakeProvider::new(snapshot());

    let report = orchestrator(store.clone(), &provider).run().await.unwrap();
    assert!(matches!(report.outcome, RunOutcome::AlreadyInProgress));

    let t = store.tables();
    assert_eq!(t.fact_row_count(), 0);
    assert!(t.jobs[0].in_progress, "another run still owns the flag");
    assert_eq!(t.history.len(), 1);
    assert_eq!(t.history[0].status, RunStatus::Warning);
    assert_eq!(provider.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_holder_finishing_before_reread_still_counts_as_in_progress() {
    let inner = MemoryStore::new();
    inner.put_job(JOB, true, true);
    let store = Arc::new(FaultyStore(inner, Fault::HolderFinishesAfterBegin));
    let provider = FakeProvider::new(snapshot());

    let report = orchestrator(store.clone(), &provider).run().await.unwrap();
    assert!(matches!(report.outcome, RunOutcome::AlreadyInProgress));

    let t = store.0.tables();
    assert_eq!(t.fact_row_count(), 0);
    assert!(!t.jobs[0].in_progress);
    assert_eq!(t.history.len(), 1);
    assert_eq!(t.history[0].status, RunStatus::Warning);
    assert_eq!(provider.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_or_inactive_job_is_not_attempted() {
    let store = Arc::new(MemoryStore::new());
    store.put_job("paused", false, false);
    let provider = FakeProvider::new(snapshot());

    let missing = orchestrator(store.clone(), &provider).run().await;
    assert!(matches!(missing, Err(RunError::JobNotFound(ref name)) if name == JOB));

    let paused = Orchestrator::new(
        store.clone(),
        Arc::new(provider.clone()),
        &CronConfig {
            job_name: "paused".to_string(),
            ..CronConfig::default()
        },
    );
    assert!(matches!(paused.run().await, Err(RunError::JobInactive(_))));

    let t = store.tables();
    assert!(t.history.is_empty());
    assert_eq!(t.fact_row_count(), 0);
    assert_eq!(provider.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overlapping_runs_only_one_starts() {
    let store = idle_job_store();
    let gate = Arc::new(Notify::new());
    let provider = FakeProvider::new(snapshot()).gated(gate.clone());
    let orchestrator = orchestrator(store.clone(), &provider);

    let first = orchestrator.run();
    let second = async {
        // Wait until the first run is inside its fetch, then collide with it.
        provider.entered.notified().await;
        let report = orchestrator.run().await;
        gate.notify_one();
        report
    };
    let (first, second) = tokio::join!(first, second);

    let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
    let started = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Succeeded(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::AlreadyInProgress))
        .count();
    assert_eq!((started, skipped), (1, 1));

    let t = store.tables();
    assert_eq!(t.totals.len(), 1);
    assert!(!t.jobs[0].in_progress);
    let mut statuses: Vec<_> = t.history.iter().map(|h| h.status.as_str()).collect();
    statuses.sort_unstable();
    assert_eq!(statuses, vec!["succeeded", "warning"]);
}

#[tokio::test]
async fn test_fetch_timeout_releases_job_and_session() {
    let store = idle_job_store();
    let provider = FakeProvider::new(snapshot()).hanging_at(Step::Ages);

    let report = orchestrator(store.clone(), &provider)
        .with_fetch_timeout(Duration::from_millis(50))
        .run()
        .await
        .unwrap();
    assert!(matches!(report.outcome, RunOutcome::Failed(IngestError::FetchTimeout(_))));

    let t = store.tables();
    assert_eq!(t.fact_row_count(), 0);
    assert!(!t.jobs[0].in_progress);
    assert_eq!(t.history[0].status, RunStatus::Failed);
    assert_eq!(provider.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test]
async fn test_group_failure_keeps_other_groups() {
    let inner = MemoryStore::new();
    inner.put_job(JOB, true, false);
    let store = Arc::new(FaultyStore(inner, Fault::CityFactsDown));
    let provider = FakeProvider::new(snapshot());

    let report = orchestrator(store.clone(), &provider).run().await.unwrap();
    let RunOutcome::Failed(err) = &report.outcome else {
        panic!("expected failure, got {:?}", report.outcome);
    };
    assert_eq!(err.failed_groups(), vec![FactGroup::Cities]);

    let t = store.0.tables();
    assert_eq!(t.totals.len(), 1);
    assert_eq!(t.gender.len(), 1);
    assert_eq!(t.pregnancy.len(), 1);
    assert_eq!(t.origin.len(), 1);
    assert_eq!(t.age_facts.len(), 1);
    assert!(t.city_facts.is_empty());

    assert!(!t.jobs[0].in_progress);
    assert!(t.jobs[0].last_success.is_none());
    assert_eq!(t.history.len(), 1);
    assert_eq!(t.history[0].status, RunStatus::Failed);
}
