//! Bucket usage collection and monthly aggregation for Ceph RGW clusters.
//!
//! Talks to the RGW admin API with SigV4-signed requests, persists one usage
//! sample per bucket and collection run in SQLite, rolls the samples up into
//! monthly per-bucket averages, and prunes raw samples once their month is
//! complete and aggregated.
//!
//! ```text
//! RGW Admin API                SQLite
//! ┌───────────────┐           ┌──────────────────┐
//! │ /admin/bucket │ ────────▶ │ bucket_usage     │───▶ AggregationEngine
//! └───────────────┘           │ monthly_averages │◀───────┘
//!        ▲                    └──────────────────┘
//!        │                             ▲
//!   RequestSigner              RetentionPruner
//! ```
//!
//! The pipeline runs as a single short-lived invocation, typically from a
//! scheduler; nothing retries and nothing runs in parallel.

pub mod admin;
pub mod aggregation;
pub mod collector;
pub mod config;
pub mod error;
pub mod prune;
pub mod signer;
pub mod store;

pub use admin::{AdminApiClient, BucketFailure, UsageBatch};
pub use aggregation::AggregationEngine;
pub use collector::{CollectionReport, UsagePipeline};
pub use config::{Config, Overrides};
pub use error::{Result, UsageError};
pub use prune::RetentionPruner;
pub use signer::RequestSigner;
pub use store::{month_window, MonthlyAverage, UsageSample, UsageStore};
