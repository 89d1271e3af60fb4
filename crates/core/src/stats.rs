//! Snapshot types: one complete set of statistics fetched from the source.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::age::AgeUnit;

/// Headline totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub confirmed: i64,
    pub recovered: i64,
    pub suspected: i64,
    pub deaths: i64,
    pub monitored: i64,
}

/// Gender, pregnancy and case-origin breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownStats {
    pub men_cases: i64,
    pub women_cases: i64,
    pub pregnant_cases: i64,
    pub local_cases: i64,
    pub imported_cases: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeBucketStat {
    pub range_label: String,
    pub bucket_type: AgeUnit,
    pub case_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityStat {
    pub city_name: String,
    pub confirmed: i64,
    pub recovered: i64,
    pub monitored: i64,
    pub deaths: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate: AggregateStats,
    /// When the source last refreshed its data.
    pub updated: DateTime<Utc>,
    pub breakdown: BreakdownStats,
    pub by_age: Vec<AgeBucketStat>,
    pub by_city: Vec<CityStat>,
}

/// Current time at the second precision the store persists.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
