//! Command-line entry point for the usage collector.

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use dialoguer::Confirm;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rgw_usage::admin::AdminApiClient;
use rgw_usage::collector::UsagePipeline;
use rgw_usage::config::{Config, Overrides};
use rgw_usage::prune::RetentionPruner;
use rgw_usage::store::{month_window, UsageStore};

#[derive(Parser)]
#[command(
    name = "rgw-usage",
    version,
    about = "S3 bucket usage monitor for Ceph RGW",
    long_about = "Collects per-bucket usage statistics from the RGW admin API, \
stores them in a local SQLite database and rolls them up into monthly averages."
)]
struct Cli {
    /// RGW admin API endpoint URL
    #[arg(long, env = "S3_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "S3_ACCESS_KEY", global = true)]
    access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3_SECRET_KEY", global = true, hide_env_values = true)]
    secret_key: Option<String>,

    /// Signing region
    #[arg(long, env = "S3_REGION", global = true)]
    region: Option<String>,

    /// SQLite database path
    #[arg(long = "db", env = "S3_DB_PATH", global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect usage data for all buckets and refresh the current month's averages
    Collect,
    /// List monthly average usage per bucket
    List {
        /// Year to query (defaults to the previous month's year)
        #[arg(long)]
        year: Option<i32>,
        /// Month to query, 1-12 (defaults to the previous month)
        #[arg(long)]
        month: Option<u32>,
    },
    /// Show usage history for a bucket over the trailing year
    History {
        /// Bucket name
        bucket: String,
    },
    /// Delete raw samples from completed, aggregated months
    Prune {
        /// Skip the confirmation prompt
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = Overrides {
        endpoint: cli.endpoint.clone(),
        access_key: cli.access_key.clone(),
        secret_key: cli.secret_key.clone(),
        region: cli.region.clone(),
        db_path: cli.db_path.clone(),
    };
    let config = Config::load(&overrides).context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    let store = UsageStore::connect(&config.database)
        .await
        .context("Failed to open usage database")?;
    store
        .run_migrations()
        .await
        .context("Failed to apply database migrations")?;

    match cli.command {
        Command::Collect => run_collect(&config, store).await,
        Command::List { year, month } => run_list(store, year, month).await,
        Command::History { bucket } => run_history(store, &bucket).await,
        Command::Prune { confirm } => run_prune(store, confirm).await,
    }
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn run_collect(config: &Config, store: UsageStore) -> anyhow::Result<()> {
    config.validate_credentials()?;

    let client = AdminApiClient::new(&config.s3)?;
    let pipeline = UsagePipeline::new(client, store);

    println!("Collecting bucket usage data...");
    let report = pipeline.collect(Utc::now()).await?;

    println!(
        "Stored {} samples, aggregated {} buckets for the current month.",
        report.stored, report.aggregated
    );

    // Partial failures are enumerated but do not fail the run.
    for failure in report
        .fetch_failures
        .iter()
        .chain(report.store_failures.iter())
    {
        eprintln!("  bucket {}: {}", failure.bucket_name, failure.error);
    }
    if report.failure_count() > 0 {
        println!(
            "Completed with {} bucket failure(s); see above.",
            report.failure_count()
        );
    }

    Ok(())
}

async fn run_list(store: UsageStore, year: Option<i32>, month: Option<u32>) -> anyhow::Result<()> {
    let now = Utc::now();
    let (year, month) = match year {
        None => previous_month(now),
        Some(year) => (year, month.unwrap_or(now.month())),
    };
    if !(1..=12).contains(&month) {
        anyhow::bail!("month must be between 1 and 12");
    }

    let mut averages = store.query_monthly_averages(year, month).await?;

    if averages.is_empty() {
        println!("No data available for {year}-{month:02}");
        return Ok(());
    }

    // Largest buckets first for display.
    averages.sort_by(|a, b| b.avg_size_bytes.total_cmp(&a.avg_size_bytes));

    println!("Monthly average usage for {year}-{month:02}\n");
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Bucket", "Size", "Objects", "Samples"]);
    for average in &averages {
        table.add_row(vec![
            average.bucket_name.clone(),
            format_size(average.avg_size_bytes),
            format!("{}", average.avg_object_count as i64),
            format!("{}", average.sample_count),
        ]);
    }
    println!("{table}");

    Ok(())
}

async fn run_history(store: UsageStore, bucket: &str) -> anyhow::Result<()> {
    let now = Utc::now();
    let start = month_window(now.year() - 1, now.month())?.0;
    let end = month_window(now.year(), now.month())?.1;

    let samples = store.query_range(bucket, start, end).await?;

    if samples.is_empty() {
        println!("No usage data available for bucket {bucket}");
        return Ok(());
    }

    println!("Usage history for bucket {bucket}\n");
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Date", "Size", "Objects"]);
    for sample in &samples {
        table.add_row(vec![
            sample.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_size(sample.size_bytes as f64),
            format!("{}", sample.object_count),
        ]);
    }
    println!("{table}");

    Ok(())
}

async fn run_prune(store: UsageStore, confirm: bool) -> anyhow::Result<()> {
    if !confirm {
        let proceed = Confirm::new()
            .with_prompt(
                "This permanently deletes raw samples from completed months that \
have calculated monthly averages. The averages are preserved. Continue?",
            )
            .default(false)
            .interact()?;
        if !proceed {
            println!("Pruning cancelled.");
            return Ok(());
        }
    }

    println!("Pruning old samples...");
    let deleted = RetentionPruner::new(store).prune(Utc::now()).await?;

    if deleted == 0 {
        println!("No data to prune. All samples are still needed or no monthly averages exist yet.");
    } else {
        println!("Pruned {deleted} samples from completed months.");
    }

    Ok(())
}

fn previous_month(now: DateTime<Utc>) -> (i32, u32) {
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}

/// Human-readable size with 1024-based units, matching the collector's
/// kibibyte-denominated source data.
fn format_size(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;
    const PB: f64 = TB * 1024.0;

    if bytes >= PB {
        format!("{:.2} PB", bytes / PB)
    } else if bytes >= TB {
        format!("{:.2} TB", bytes / TB)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes / KB)
    } else {
        format!("{bytes:.0} bytes")
    }
}
