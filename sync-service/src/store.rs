use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use utility_client::db::statistics_queries;
use utility_client::domain::{SeriesMetadata, StatPoint};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("statistics store error: {0}")]
    Backend(String),
}

/// The two operations the engine needs from persistence. `last_cumulative`
/// takes a cutoff (the batch's earliest hour) so rewriting an overlapping
/// range reproduces the previously stored sums exactly.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn last_cumulative(
        &self,
        series_id: &str,
        before: OffsetDateTime,
    ) -> Result<Option<f64>, StoreError>;

    async fn append_points(
        &self,
        meta: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError>;
}

pub struct PgStatisticsStore {
    pool: PgPool,
}

impl PgStatisticsStore {
    /// Wrap a pool and make sure the statistics tables exist.
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        statistics_queries::ensure_schema(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatisticsStore for PgStatisticsStore {
    async fn last_cumulative(
        &self,
        series_id: &str,
        before: OffsetDateTime,
    ) -> Result<Option<f64>, StoreError> {
        statistics_queries::last_cumulative_before(&self.pool, series_id, before)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn append_points(
        &self,
        meta: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError> {
        statistics_queries::upsert_metadata(&self.pool, meta)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        statistics_queries::upsert_points(&self.pool, &meta.id, points)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        metrics::counter!("statistic_points_written_total").increment(points.len() as u64);
        Ok(())
    }
}

/// Map-backed store for tests and storeless development runs.
#[derive(Default)]
pub struct MemoryStatisticsStore {
    series: Mutex<HashMap<String, BTreeMap<OffsetDateTime, f64>>>,
    meta: Mutex<HashMap<String, SeriesMetadata>>,
}

impl MemoryStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored points of one series, in time order.
    pub fn points(&self, series_id: &str) -> Vec<StatPoint> {
        self.series
            .lock()
            .expect("store mutex poisoned")
            .get(series_id)
            .map(|points| {
                points
                    .iter()
                    .map(|(start, sum)| StatPoint {
                        start: *start,
                        sum: *sum,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn metadata(&self, series_id: &str) -> Option<SeriesMetadata> {
        self.meta
            .lock()
            .expect("store mutex poisoned")
            .get(series_id)
            .cloned()
    }
}

#[async_trait]
impl StatisticsStore for MemoryStatisticsStore {
    async fn last_cumulative(
        &self,
        series_id: &str,
        before: OffsetDateTime,
    ) -> Result<Option<f64>, StoreError> {
        Ok(self
            .series
            .lock()
            .expect("store mutex poisoned")
            .get(series_id)
            .and_then(|points| points.range(..before).next_back().map(|(_, sum)| *sum)))
    }

    async fn append_points(
        &self,
        meta: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError> {
        self.meta
            .lock()
            .expect("store mutex poisoned")
            .insert(meta.id.clone(), meta.clone());

        let mut series = self.series.lock().expect("store mutex poisoned");
        let entry = series.entry(meta.id.clone()).or_default();
        for point in points {
            entry.insert(point.start, point.sum);
        }
        Ok(())
    }
}
