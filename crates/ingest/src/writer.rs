//! Appends one snapshot to the six fact tables.
//!
//! Each group is written and committed on its own. A failing group does not
//! stop the others; the failures are collected and returned together.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info, warn};

use epistat_core::{
    now_seconds, parse_age_range, AgeBucketStat, AggregateStats, BreakdownStats, CityStat, Snapshot,
};
use epistat_storage::{
    AgeFact, CaseOrigin, CityFact, FactStamp, GenderSplit, StatsStore, StoreError,
};

use crate::error::{FactGroup, GroupFailure, IngestError};
use crate::resolver::ReferenceResolver;

/// Rows written per fact group, plus age labels that could not be bucketed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: Vec<(FactGroup, u64)>,
    pub skipped_age_labels: Vec<String>,
}

impl WriteSummary {
    pub fn total_rows(&self) -> u64 {
        self.rows.iter().map(|(_, n)| n).sum()
    }

    pub fn rows_for(&self, group: FactGroup) -> Option<u64> {
        self.rows.iter().find(|(g, _)| *g == group).map(|(_, n)| *n)
    }
}

impl fmt::Display for WriteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self
            .rows
            .iter()
            .map(|(g, n)| format!("{} {}", g, n))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "wrote {} fact rows ({})", self.total_rows(), groups)?;
        if !self.skipped_age_labels.is_empty() {
            write!(f, "; skipped {} age labels", self.skipped_age_labels.len())?;
        }
        Ok(())
    }
}

pub struct StatWriter<'a> {
    store: &'a dyn StatsStore,
    resolver: ReferenceResolver<'a>,
    stamp: FactStamp,
}

impl<'a> StatWriter<'a> {
    /// `updated` is the source refresh time; the ingestion time is taken now.
    pub fn new(store: &'a dyn StatsStore, updated: DateTime<Utc>) -> Self {
        Self {
            store,
            resolver: ReferenceResolver::new(store),
            stamp: FactStamp {
                updated: updated.trunc_subsecs(0),
                added: now_seconds(),
            },
        }
    }

    pub fn stamp(&self) -> FactStamp {
        self.stamp
    }

    pub async fn write_totals(&self, stats: &AggregateStats) -> Result<u64, StoreError> {
        self.store.insert_totals(stats, self.stamp).await?;
        Ok(1)
    }

    pub async fn write_gender_split(&self, breakdown: &BreakdownStats) -> Result<u64, StoreError> {
        let split = GenderSplit {
            male_cases: breakdown.men_cases,
            female_cases: breakdown.women_cases,
        };
        self.store.insert_gender_split(&split, self.stamp).await?;
        Ok(1)
    }

    pub async fn write_pregnancy(&self, breakdown: &BreakdownStats) -> Result<u64, StoreError> {
        self.store
            .insert_pregnancy_cases(breakdown.pregnant_cases, self.stamp)
            .await?;
        Ok(1)
    }

    pub async fn write_case_origin(&self, breakdown: &BreakdownStats) -> Result<u64, StoreError> {
        let origin = CaseOrigin {
            local_cases: breakdown.local_cases,
            imported_cases: breakdown.imported_cases,
        };
        self.store.insert_case_origin(&origin, self.stamp).await?;
        Ok(1)
    }

    /// Resolve every city first, then append all rows in one bulk write.
    pub async fn write_cities(&mut self, stats: &[CityStat]) -> Result<u64, StoreError> {
        let mut rows = Vec::with_capacity(stats.len());
        for stat in stats {
            rows.push(CityFact {
                city_id: self.resolver.city_id(&stat.city_name).await?,
                confirmed: stat.confirmed,
                recovered: stat.recovered,
                monitored: stat.monitored,
                deaths: stat.deaths,
            });
        }
        self.store.insert_city_facts(&rows, self.stamp).await
    }

    /// Resolve every parseable bucket, then append in one bulk write.
    /// Returns the rows written and the labels that were skipped.
    pub async fn write_age_buckets(
        &mut self,
        stats: &[AgeBucketStat],
    ) -> Result<(u64, Vec<String>), StoreError> {
        let mut rows = Vec::with_capacity(stats.len());
        let mut skipped = Vec::new();
        for stat in stats {
            let Some(range) = parse_age_range(&stat.range_label, stat.bucket_type) else {
                debug!(label = %stat.range_label, "skipping non-standard age label");
                skipped.push(stat.range_label.clone());
                continue;
            };
            rows.push(AgeFact {
                age_bucket_id: self.resolver.age_bucket_id(&range).await?,
                cases: stat.case_count,
            });
        }
        let written = self.store.insert_age_facts(&rows, self.stamp).await?;
        Ok((written, skipped))
    }

    /// Write all six groups. Any group failure turns the result into
    /// [`IngestError::GroupWrites`]; groups that succeeded stay committed.
    pub async fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<WriteSummary, IngestError> {
        let mut summary = WriteSummary::default();
        let mut failures = Vec::new();

        let results = [
            (FactGroup::Totals, self.write_totals(&snapshot.aggregate).await),
            (FactGroup::GenderSplit, self.write_gender_split(&snapshot.breakdown).await),
            (FactGroup::Pregnancy, self.write_pregnancy(&snapshot.breakdown).await),
            (FactGroup::CaseOrigin, self.write_case_origin(&snapshot.breakdown).await),
            (FactGroup::Cities, self.write_cities(&snapshot.by_city).await),
        ];
        for (group, result) in results {
            record_group(group, result, &mut summary, &mut failures);
        }

        let ages = self
            .write_age_buckets(&snapshot.by_age)
            .await
            .map(|(written, skipped)| {
                summary.skipped_age_labels = skipped;
                written
            });
        record_group(FactGroup::AgeBuckets, ages, &mut summary, &mut failures);

        if failures.is_empty() {
            info!(rows = summary.total_rows(), skipped = summary.skipped_age_labels.len(), "snapshot written");
            Ok(summary)
        } else {
            Err(IngestError::GroupWrites(failures))
        }
    }
}

fn record_group(
    group: FactGroup,
    result: Result<u64, StoreError>,
    summary: &mut WriteSummary,
    failures: &mut Vec<GroupFailure>,
) {
    match result {
        Ok(rows) => {
            debug!(group = %group, rows, "fact group written");
            summary.rows.push((group, rows));
        }
        Err(error) => {
            warn!(group = %group, error = %error, "fact group write failed");
            failures.push(GroupFailure { group, error });
        }
    }
}
