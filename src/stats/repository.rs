//! Statistics persistence
//!
//! [`StatsRepository`] is the seam for durable rollups. The in-memory
//! implementation backs tests, the CLI and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::aggregate::{AggregateRecord, KeyAccessRecord, Period};
use crate::error::Result;

/// Rows produced by one persistence cycle
#[derive(Debug, Clone, Default)]
pub struct RollupBatch {
    pub aggregates: Vec<AggregateRecord>,
    pub key_rows: Vec<KeyAccessRecord>,
}

impl RollupBatch {
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty() && self.key_rows.is_empty()
    }
}

/// Storage for rolled-up statistics
#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn find_aggregate(
        &self,
        cache: &str,
        period: Period,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<AggregateRecord>>;

    /// Insert or replace by (cache, period, bucket_start)
    async fn save_aggregate(&self, record: AggregateRecord) -> Result<()>;

    /// Records with `from <= bucket_start <= to`, most recent first
    async fn list_aggregates(
        &self,
        cache: &str,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateRecord>>;

    /// Returns the number of removed records
    async fn delete_aggregates(
        &self,
        cache: &str,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    async fn find_key_access(&self, cache: &str, key: &str) -> Result<Option<KeyAccessRecord>>;

    /// Insert or replace by (cache, key)
    async fn save_key_access(&self, record: KeyAccessRecord) -> Result<()>;

    async fn list_key_access(&self, cache: &str) -> Result<Vec<KeyAccessRecord>>;

    async fn delete_key_access(&self, cache: &str) -> Result<u64>;

    /// Insert or replace every row of `batch`. Either all rows are written
    /// or none are: a failed batch is retried whole on the next cycle.
    async fn save_rollup(&self, batch: RollupBatch) -> Result<()>;
}

type AggregateId = (String, Period, DateTime<Utc>);

/// Repository held in process memory
#[derive(Debug, Default)]
pub struct InMemoryStatsRepository {
    aggregates: DashMap<AggregateId, AggregateRecord>,
    keys: DashMap<(String, String), KeyAccessRecord>,
}

impl InMemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn key_access_count(&self) -> usize {
        self.keys.len()
    }
}

fn in_range(
    record: &AggregateRecord,
    cache: &str,
    period: Option<Period>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> bool {
    record.cache == cache
        && period.map_or(true, |p| record.period == p)
        && from.map_or(true, |f| record.bucket_start >= f)
        && to.map_or(true, |t| record.bucket_start <= t)
}

#[async_trait]
impl StatsRepository for InMemoryStatsRepository {
    async fn find_aggregate(
        &self,
        cache: &str,
        period: Period,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<AggregateRecord>> {
        let id = (cache.to_string(), period, bucket_start);
        Ok(self.aggregates.get(&id).map(|r| r.value().clone()))
    }

    async fn save_aggregate(&self, record: AggregateRecord) -> Result<()> {
        let id = (record.cache.clone(), record.period, record.bucket_start);
        self.aggregates.insert(id, record);
        Ok(())
    }

    async fn list_aggregates(
        &self,
        cache: &str,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateRecord>> {
        let mut records: Vec<AggregateRecord> = self
            .aggregates
            .iter()
            .filter(|r| in_range(r.value(), cache, period, from, to))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            b.bucket_start
                .cmp(&a.bucket_start)
                .then(a.period.cmp(&b.period))
        });
        Ok(records)
    }

    async fn delete_aggregates(
        &self,
        cache: &str,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let before = self.aggregates.len();
        self.aggregates
            .retain(|_, r| !in_range(r, cache, period, from, to));
        Ok(before.saturating_sub(self.aggregates.len()) as u64)
    }

    async fn find_key_access(&self, cache: &str, key: &str) -> Result<Option<KeyAccessRecord>> {
        let id = (cache.to_string(), key.to_string());
        Ok(self.keys.get(&id).map(|r| r.value().clone()))
    }

    async fn save_key_access(&self, record: KeyAccessRecord) -> Result<()> {
        let id = (record.cache.clone(), record.key.clone());
        self.keys.insert(id, record);
        Ok(())
    }

    async fn list_key_access(&self, cache: &str) -> Result<Vec<KeyAccessRecord>> {
        Ok(self
            .keys
            .iter()
            .filter(|r| r.value().cache == cache)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete_key_access(&self, cache: &str) -> Result<u64> {
        let before = self.keys.len();
        self.keys.retain(|(c, _), _| c != cache);
        Ok(before.saturating_sub(self.keys.len()) as u64)
    }

    // Inserts cannot fail, so the batch lands whole
    async fn save_rollup(&self, batch: RollupBatch) -> Result<()> {
        for record in batch.aggregates {
            let id = (record.cache.clone(), record.period, record.bucket_start);
            self.aggregates.insert(id, record);
        }
        for record in batch.key_rows {
            let id = (record.cache.clone(), record.key.clone());
            self.keys.insert(id, record);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
