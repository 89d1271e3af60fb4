use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use epistat_core::now_seconds;
use epistat_storage::{NewHistoryEntry, RunStatus, StatsStore, StoreError};

/// Appends the single history row of one run attempt.
pub struct HistoryRecorder<'a> {
    store: &'a dyn StatsStore,
    run_id: Uuid,
    job_name: String,
    started_at: DateTime<Utc>,
}

impl<'a> HistoryRecorder<'a> {
    pub fn new(
        store: &'a dyn StatsStore,
        run_id: Uuid,
        job_name: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            run_id,
            job_name: job_name.into(),
            started_at,
        }
    }

    /// Consumes the recorder: a run gets exactly one row.
    /// `finished_at` defaults to now.
    pub async fn record(
        self,
        status: RunStatus,
        message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let entry = NewHistoryEntry {
            run_id: self.run_id,
            job_name: self.job_name,
            status,
            message,
            started_at: self.started_at,
            finished_at: finished_at.unwrap_or_else(now_seconds),
        };
        self.store.append_history(&entry).await?;
        debug!(job = %entry.job_name, run_id = %entry.run_id, status = %status, "history recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use epistat_storage::MemoryStore;

    #[tokio::test]
    async fn test_record_defaults_finished_at_to_now() {
        let store = MemoryStore::new();
        let started = Utc.with_ymd_and_hms(2020, 4, 1, 8, 0, 0).unwrap();
        let run_id = Uuid::new_v4();

        HistoryRecorder::new(&store, run_id, "stats-job", started)
            .record(RunStatus::Warning, Some("busy".into()), None)
            .await
            .unwrap();

        let history = store.tables().history;
        assert_eq!(history.len(), 1);
        let row = &history[0];
        assert_eq!(row.run_id, run_id);
        assert_eq!(row.status, RunStatus::Warning);
        assert_eq!(row.message.as_deref(), Some("busy"));
        assert_eq!(row.started_at, started);
        assert!(row.finished_at > started);
    }

    #[tokio::test]
    async fn test_record_uses_explicit_finish_time() {
        let store = MemoryStore::new();
        let started = Utc.with_ymd_and_hms(2020, 4, 1, 8, 0, 0).unwrap();
        let finished = Utc.with_ymd_and_hms(2020, 4, 1, 8, 5, 0).unwrap();

        HistoryRecorder::new(&store, Uuid::new_v4(), "stats-job", started)
            .record(RunStatus::Failed, None, Some(finished))
            .await
            .unwrap();

        assert_eq!(store.tables().history[0].finished_at, finished);
    }
}
