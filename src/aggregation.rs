//! Monthly rollup of raw usage samples.

use tracing::debug;

use crate::error::Result;
use crate::store::{month_window, MonthlyAverage, UsageStore};

/// Computes per-bucket monthly averages and writes them through the store.
pub struct AggregationEngine {
    store: UsageStore,
}

impl AggregationEngine {
    pub fn new(store: UsageStore) -> Self {
        Self { store }
    }

    /// Recompute the monthly average for every bucket with at least one
    /// sample inside the month window.
    ///
    /// Buckets without samples produce no aggregate row. Existing rows for
    /// the month are replaced with stats computed from the samples present
    /// right now, so recomputing after raw samples changed (or were pruned)
    /// stores a different result. Statements run independently; there is no
    /// spanning transaction.
    ///
    /// Returns the number of buckets aggregated.
    pub async fn calculate_monthly_averages(&self, year: i32, month: u32) -> Result<usize> {
        let (start, end) = month_window(year, month)?;

        let buckets = self.store.distinct_buckets_in_window(start, end).await?;

        for bucket_name in &buckets {
            // The window can empty out between discovery and the stats
            // query; skip rather than write a zero-sample row.
            let Some(stats) = self.store.window_stats(bucket_name, start, end).await? else {
                continue;
            };

            self.store
                .upsert_monthly_average(&MonthlyAverage {
                    bucket_name: bucket_name.clone(),
                    year,
                    month,
                    avg_size_bytes: stats.avg_size_bytes,
                    avg_object_count: stats.avg_object_count,
                    sample_count: stats.sample_count,
                })
                .await?;
        }

        debug!(year, month, buckets = buckets.len(), "Recomputed monthly averages");

        Ok(buckets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory_store, UsageSample};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    async fn insert(store: &UsageStore, bucket: &str, timestamp: DateTime<Utc>, size: i64, count: i64) {
        store
            .store_sample(&UsageSample {
                id: 0,
                bucket_name: bucket.to_string(),
                size_bytes: size,
                object_count: count,
                timestamp,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn average_is_the_arithmetic_mean_over_the_month() {
        let store = memory_store().await;
        insert(&store, "b1", at(2025, 1, 5), 100, 10).await;
        insert(&store, "b1", at(2025, 1, 10), 200, 20).await;
        insert(&store, "b1", at(2025, 1, 20), 300, 30).await;

        let engine = AggregationEngine::new(store.clone());
        let aggregated = engine.calculate_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(aggregated, 1);

        let averages = store.query_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].bucket_name, "b1");
        assert_eq!(averages[0].avg_size_bytes, 200.0);
        assert_eq!(averages[0].avg_object_count, 20.0);
        assert_eq!(averages[0].sample_count, 3);
    }

    #[tokio::test]
    async fn recomputation_over_unchanged_samples_is_idempotent() {
        let store = memory_store().await;
        insert(&store, "b1", at(2025, 1, 5), 128, 3).await;
        insert(&store, "b1", at(2025, 1, 9), 256, 5).await;

        let engine = AggregationEngine::new(store.clone());
        engine.calculate_monthly_averages(2025, 1).await.unwrap();
        let first = store.query_monthly_averages(2025, 1).await.unwrap();

        engine.calculate_monthly_averages(2025, 1).await.unwrap();
        let second = store.query_monthly_averages(2025, 1).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn recomputation_after_new_sample_replaces_the_row() {
        let store = memory_store().await;
        insert(&store, "b1", at(2025, 1, 5), 100, 1).await;

        let engine = AggregationEngine::new(store.clone());
        engine.calculate_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(
            store.query_monthly_averages(2025, 1).await.unwrap()[0].avg_size_bytes,
            100.0
        );

        // The same key recomputed over a different population replaces the
        // stored stats rather than merging with them.
        insert(&store, "b1", at(2025, 1, 15), 300, 3).await;
        engine.calculate_monthly_averages(2025, 1).await.unwrap();

        let averages = store.query_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].avg_size_bytes, 200.0);
        assert_eq!(averages[0].sample_count, 2);
    }

    #[tokio::test]
    async fn buckets_outside_the_window_produce_no_row() {
        let store = memory_store().await;
        insert(&store, "b1", at(2025, 2, 3), 100, 1).await;

        let engine = AggregationEngine::new(store.clone());
        let aggregated = engine.calculate_monthly_averages(2025, 1).await.unwrap();

        assert_eq!(aggregated, 0);
        assert!(store.query_monthly_averages(2025, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_boundaries_are_inclusive() {
        let store = memory_store().await;
        insert(
            &store,
            "b1",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            100,
            1,
        )
        .await;
        insert(
            &store,
            "b1",
            Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap(),
            300,
            3,
        )
        .await;
        insert(
            &store,
            "b1",
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            900,
            9,
        )
        .await;

        let engine = AggregationEngine::new(store.clone());
        engine.calculate_monthly_averages(2025, 1).await.unwrap();

        let averages = store.query_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(averages[0].sample_count, 2);
        assert_eq!(averages[0].avg_size_bytes, 200.0);
    }

    #[tokio::test]
    async fn each_bucket_gets_its_own_row() {
        let store = memory_store().await;
        insert(&store, "b1", at(2025, 1, 5), 100, 1).await;
        insert(&store, "b2", at(2025, 1, 5), 500, 5).await;

        let engine = AggregationEngine::new(store.clone());
        let aggregated = engine.calculate_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(aggregated, 2);

        let averages = store.query_monthly_averages(2025, 1).await.unwrap();
        assert_eq!(averages.len(), 2);
        assert_eq!(averages[0].bucket_name, "b1");
        assert_eq!(averages[1].bucket_name, "b2");
    }
}
