//! Retention of raw samples once their month is aggregated.

use chrono::{DateTime, Datelike, Utc};
use tracing::info;

use crate::error::Result;
use crate::store::{month_window, UsageStore};

/// Deletes raw samples for completed, already-aggregated months.
pub struct RetentionPruner {
    store: UsageStore,
}

impl RetentionPruner {
    pub fn new(store: UsageStore) -> Self {
        Self { store }
    }

    /// Delete all raw samples belonging to completed months that have at
    /// least one aggregate row.
    ///
    /// A month is completed when its start lies strictly before the start
    /// of the month containing `now`; `now` is injected so prune decisions
    /// are deterministic. Pruning scope is per month, not per
    /// (bucket, month): one bucket's aggregate is enough to delete every
    /// bucket's raw samples for that month.
    ///
    /// Discovery and deletion run inside a single transaction; on any
    /// failure nothing is deleted and the error is returned. Returns the
    /// total number of rows deleted, 0 when no month qualifies.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let current_month_start = month_window(now.year(), now.month())?.0;

        let mut tx = self.store.pool().begin().await?;

        let aggregated_months: Vec<(i32, u32)> = sqlx::query_as(
            r#"
            SELECT DISTINCT year, month
            FROM monthly_averages
            ORDER BY year, month
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut total_deleted = 0u64;
        for (year, month) in aggregated_months {
            let (start, end) = month_window(year, month)?;
            if start >= current_month_start {
                continue;
            }

            let result = sqlx::query(
                r#"
                DELETE FROM bucket_usage
                WHERE timestamp >= ? AND timestamp <= ?
                "#,
            )
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;

            total_deleted += result.rows_affected();
        }

        tx.commit().await?;

        if total_deleted > 0 {
            info!(deleted = total_deleted, "Pruned raw samples from completed months");
        }

        Ok(total_deleted)
    }
}
