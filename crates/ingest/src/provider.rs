//! The statistics source seam.
//!
//! A [`StatsProvider`] hands out one [`StatsSession`] per snapshot. The session
//! owns whatever external resource the source needs and releases it on drop,
//! so every exit path out of [`fetch_snapshot`] frees it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use epistat_core::{AgeBucketStat, AggregateStats, BreakdownStats, CityStat, Snapshot};

use crate::error::ProviderError;

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Acquire the resources for one snapshot fetch.
    async fn open_session(&self) -> Result<Box<dyn StatsSession>, ProviderError>;
}

/// One scoped fetch. Each call is a single attempt; no retries.
#[async_trait]
pub trait StatsSession: Send {
    async fn aggregate_stats(&mut self) -> Result<AggregateStats, ProviderError>;

    /// When the source last refreshed its numbers.
    async fn last_update(&mut self) -> Result<DateTime<Utc>, ProviderError>;

    async fn breakdown_stats(&mut self) -> Result<BreakdownStats, ProviderError>;

    async fn stats_by_age_bucket(&mut self) -> Result<Vec<AgeBucketStat>, ProviderError>;

    async fn stats_by_city(&mut self) -> Result<Vec<CityStat>, ProviderError>;
}

/// Collect a complete snapshot inside one session.
///
/// Nothing partial is returned: any failing call fails the whole fetch.
pub async fn fetch_snapshot(provider: &dyn StatsProvider) -> Result<Snapshot, ProviderError> {
    let mut session = provider.open_session().await?;

    let aggregate = session.aggregate_stats().await?;
    let updated = session.last_update().await?;
    let breakdown = session.breakdown_stats().await?;
    let by_age = session.stats_by_age_bucket().await?;
    let by_city = session.stats_by_city().await?;
    drop(session);

    debug!(
        age_rows = by_age.len(),
        city_rows = by_city.len(),
        updated = %updated,
        "snapshot collected"
    );

    Ok(Snapshot {
        aggregate,
        updated,
        breakdown,
        by_age,
        by_city,
    })
}
