//! [`StatsProvider`] backed by a JSON-over-HTTP statistics source.
//!
//! Resources are fetched relative to `STATS_SOURCE_URL`:
//!
//! | resource    | body |
//! |-------------|------|
//! | `general`   | `{"confirmed", "recovered", "suspected", "deaths", "monitored"}` |
//! | `updated`   | `{"updated": "<timestamp>"}` |
//! | `breakdown` | `{"menCases", "womenCases", "pregnantCases", "localCases", "importedCases"}` |
//! | `ages`      | `[{"rangeLabel", "bucketType", "caseCount"}]` |
//! | `cities`    | `[{"cityName", "confirmed", "recovered", "monitored", "deaths"}]` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use epistat_core::config::ProviderConfig;
use epistat_core::{AgeBucketStat, AgeUnit, AggregateStats, BreakdownStats, CityStat};

use crate::error::ProviderError;
use crate::provider::{StatsProvider, StatsSession};

/// Naive formats the source has used for its refresh time, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M", "%d.%m.%Y %H:%M:%S"];

pub struct HttpStatsProvider {
    base_url: String,
    request_timeout: Duration,
}

impl HttpStatsProvider {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(config.require_source_url()?, config.request_timeout()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl StatsProvider for HttpStatsProvider {
    async fn open_session(&self) -> Result<Box<dyn StatsSession>, ProviderError> {
        // A fresh client per session: its connection pool dies with the session.
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;
        debug!(base_url = %self.base_url, "stats session opened");
        Ok(Box::new(HttpStatsSession {
            client,
            base_url: self.base_url.clone(),
        }))
    }
}

struct HttpStatsSession {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatsSession {
    async fn get_json<T: DeserializeOwned>(&self, resource: &str) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, resource);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.json::<T>().await?;
        Ok(body)
    }
}

impl Drop for HttpStatsSession {
    fn drop(&mut self) {
        debug!(base_url = %self.base_url, "stats session released");
    }
}

#[derive(Deserialize)]
struct UpdatedBody {
    updated: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgeRow {
    range_label: String,
    bucket_type: String,
    case_count: i64,
}

impl From<AgeRow> for AgeBucketStat {
    fn from(row: AgeRow) -> Self {
        AgeBucketStat {
            range_label: row.range_label,
            bucket_type: AgeUnit::from_source_flag(&row.bucket_type),
            case_count: row.case_count,
        }
    }
}

#[async_trait]
impl StatsSession for HttpStatsSession {
    async fn aggregate_stats(&mut self) -> Result<AggregateStats, ProviderError> {
        self.get_json("general").await
    }

    async fn last_update(&mut self) -> Result<DateTime<Utc>, ProviderError> {
        let body: UpdatedBody = self.get_json("updated").await?;
        parse_source_timestamp(&body.updated).ok_or_else(|| ProviderError::InvalidPayload {
            resource: "updated".to_string(),
            reason: format!("unrecognised timestamp '{}'", body.updated),
        })
    }

    async fn breakdown_stats(&mut self) -> Result<BreakdownStats, ProviderError> {
        self.get_json("breakdown").await
    }

    async fn stats_by_age_bucket(&mut self) -> Result<Vec<AgeBucketStat>, ProviderError> {
        let rows: Vec<AgeRow> = self.get_json("ages").await?;
        Ok(rows.into_iter().map(AgeBucketStat::from).collect())
    }

    async fn stats_by_city(&mut self) -> Result<Vec<CityStat>, ProviderError> {
        self.get_json("cities").await
    }
}

/// Parse the source's refresh time: RFC 3339, or one of the naive formats as UTC.
pub fn parse_source_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ts = parse_source_timestamp("2020-04-01T12:30:00+03:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 4, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_formats_as_utc() {
        let expected = Utc.with_ymd_and_hms(2020, 4, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_source_timestamp("2020-04-01 12:30:00"), Some(expected));
        assert_eq!(parse_source_timestamp(" 01.04.2020 12:30 "), Some(expected));
    }

    #[test]
    fn test_parse_garbage_timestamp() {
        assert_eq!(parse_source_timestamp("yesterday"), None);
    }

    #[test]
    fn test_age_rows_map_source_flag() {
        let rows: Vec<AgeRow> = serde_json::from_str(
            r#"[{"rangeLabel":"20-29","bucketType":"ani","caseCount":4},
                {"rangeLabel":"<1","bucketType":"luni","caseCount":1}]"#,
        )
        .unwrap();
        let stats: Vec<AgeBucketStat> = rows.into_iter().map(AgeBucketStat::from).collect();
        assert_eq!(stats[0].bucket_type, AgeUnit::Years);
        assert_eq!(stats[1].bucket_type, AgeUnit::Months);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = HttpStatsProvider::new("http://stats.local/api/", Duration::from_secs(5));
        assert_eq!(provider.base_url(), "http://stats.local/api");
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = ProviderConfig { source_url: None, request_timeout_secs: 5 };
        assert!(matches!(
            HttpStatsProvider::from_config(&config),
            Err(ProviderError::Config(_))
        ));
    }
}
