use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{Result, UsageError};

/// One retrieved, timestamped usage measurement for a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UsageSample {
    /// Store-assigned row id; zero until persisted
    pub id: i64,
    /// Bucket the measurement belongs to
    pub bucket_name: String,
    /// Total stored bytes at retrieval time
    pub size_bytes: i64,
    /// Total object count at retrieval time
    pub object_count: i64,
    /// Retrieval instant, not the server-reported creation time
    pub timestamp: DateTime<Utc>,
}

/// Computed monthly average of samples for a bucket.
///
/// Unique per `(bucket_name, year, month)`. Recomputation replaces the stats
/// fields; `sample_count` reflects the samples present at computation time
/// and is never adjusted when raw samples are pruned afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MonthlyAverage {
    pub bucket_name: String,
    pub year: i32,
    pub month: u32,
    pub avg_size_bytes: f64,
    pub avg_object_count: f64,
    pub sample_count: i64,
}

/// Aggregate statistics for one bucket over a time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub avg_size_bytes: f64,
    pub avg_object_count: f64,
    pub sample_count: i64,
}

/// Closed UTC window covering a calendar month: from the first instant of
/// day one through the last second of the month.
pub fn month_window(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| {
            UsageError::Configuration(format!("invalid calendar month {year}-{month:02}"))
        })?;

    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let next_start = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| {
            UsageError::Configuration(format!("invalid calendar month {year}-{month:02}"))
        })?;

    Ok((start, next_start - Duration::seconds(1)))
}

/// SQLite-backed store for usage samples and monthly aggregates.
#[derive(Debug, Clone)]
pub struct UsageStore {
    pool: SqlitePool,
}

impl UsageStore {
    /// Open (and create if missing) the usage database.
    ///
    /// SQLite serializes writers; a single pooled connection keeps every
    /// operation, including `:memory:` databases, on one handle.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!(path = %config.path, "Opened usage database");

        Ok(Self { pool })
    }

    /// Apply schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Append one usage sample. Samples are immutable once stored.
    pub async fn store_sample(&self, sample: &UsageSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bucket_usage (bucket_name, size_bytes, object_count, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&sample.bucket_name)
        .bind(sample.size_bytes)
        .bind(sample.object_count)
        .bind(sample.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Samples for one bucket inside `[start, end]`, oldest first.
    /// An empty window yields an empty vec, not an error.
    pub async fn query_range(
        &self,
        bucket_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageSample>> {
        let samples = sqlx::query_as::<_, UsageSample>(
            r#"
            SELECT id, bucket_name, size_bytes, object_count, timestamp
            FROM bucket_usage
            WHERE bucket_name = ? AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp
            "#,
        )
        .bind(bucket_name)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(samples)
    }

    /// Insert or overwrite the monthly average for one bucket.
    ///
    /// On conflict only the stats fields are replaced. Upserting the same key
    /// twice over different underlying sample populations (for instance
    /// before and after a prune) yields different stored stats; the write is
    /// deliberately last-writer-wins, not a merge.
    pub async fn upsert_monthly_average(&self, average: &MonthlyAverage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monthly_averages
                (bucket_name, year, month, avg_size_bytes, avg_object_count, sample_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (bucket_name, year, month)
            DO UPDATE SET
                avg_size_bytes = excluded.avg_size_bytes,
                avg_object_count = excluded.avg_object_count,
                sample_count = excluded.sample_count
            "#,
        )
        .bind(&average.bucket_name)
        .bind(average.year)
        .bind(average.month)
        .bind(average.avg_size_bytes)
        .bind(average.avg_object_count)
        .bind(average.sample_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All per-bucket aggregates for one month, ordered by bucket name.
    pub async fn query_monthly_averages(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<MonthlyAverage>> {
        let averages = sqlx::query_as::<_, MonthlyAverage>(
            r#"
            SELECT bucket_name, year, month, avg_size_bytes, avg_object_count, sample_count
            FROM monthly_averages
            WHERE year = ? AND month = ?
            ORDER BY bucket_name
            "#,
        )
        .bind(year)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;

        Ok(averages)
    }

    /// Monthly average for one bucket.
    ///
    /// A missing key is `NoData`, which callers treat as informational
    /// rather than fatal.
    pub async fn monthly_average(
        &self,
        bucket_name: &str,
        year: i32,
        month: u32,
    ) -> Result<MonthlyAverage> {
        let average = sqlx::query_as::<_, MonthlyAverage>(
            r#"
            SELECT bucket_name, year, month, avg_size_bytes, avg_object_count, sample_count
            FROM monthly_averages
            WHERE bucket_name = ? AND year = ? AND month = ?
            "#,
        )
        .bind(bucket_name)
        .bind(year)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;

        average.ok_or_else(|| {
            UsageError::NoData(format!(
                "no monthly average for bucket {bucket_name} in {year}-{month:02}"
            ))
        })
    }

    /// Distinct buckets with at least one sample inside `[start, end]`.
    pub async fn distinct_buckets_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let buckets = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT bucket_name
            FROM bucket_usage
            WHERE timestamp BETWEEN ? AND ?
            ORDER BY bucket_name
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(buckets)
    }

    /// Mean size, mean object count and sample count for one bucket inside
    /// `[start, end]`. `None` when the window holds no samples.
    pub async fn window_stats(
        &self,
        bucket_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<WindowStats>> {
        let (avg_size, avg_count, samples): (Option<f64>, Option<f64>, i64) = sqlx::query_as(
            r#"
            SELECT AVG(size_bytes), AVG(object_count), COUNT(*)
            FROM bucket_usage
            WHERE bucket_name = ? AND timestamp BETWEEN ? AND ?
            "#,
        )
        .bind(bucket_name)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        match (avg_size, avg_count) {
            (Some(avg_size_bytes), Some(avg_object_count)) => Ok(Some(WindowStats {
                avg_size_bytes,
                avg_object_count,
                sample_count: samples,
            })),
            _ => Ok(None),
        }
    }

    /// Underlying pool, for operations that need their own transaction.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> UsageStore {
    let config = DatabaseConfig {
        path: ":memory:".to_string(),
    };
    let store = UsageStore::connect(&config).await.unwrap();
    store.run_migrations().await.unwrap();
    store
}
