//! Cache Failure Report Library
//!
//! Classifies test-automation step records into twelve mutually exclusive
//! cache outcome categories and aggregates them into percentage-normalized
//! reports, grouped by command and by (command, package), over a time window
//! retrieved page by page from a scanning source.
//!
//! ## Core Features
//!
//! - **Priority classification**: a deterministic, priority-ordered rule engine
//!   assigns every record exactly one [`Category`]
//! - **Memory-bounded retrieval**: records stream lazily from a paged source; at
//!   most one page is held in memory
//! - **Single-pass aggregation**: one sweep fills overall, per-command and
//!   per-(command, package) buckets
//! - **Exact percentages**: every breakdown sums to `100.00%` through
//!   largest-remainder rounding
//!
//! ## Architecture Overview
//!
//! - [`source`] - Record Source Adapter: the [`PageFetcher`] seam, HTTP and
//!   JSONL backends, item decoding and the pre-filter
//! - [`classifier`] - Priority Classifier
//! - [`aggregator`] - single-pass bucket accumulation
//! - [`report`] - Report Renderer and report value types
//! - [`analyzer`] - the [`CacheReportAnalyzer`] entry points
//! - [`time_range`] / [`timestamp_parser`] - civil time (UTC+5:30) handling
//! - [`config`] / [`logging`] - configuration and structured logging
//! - [`persist`] / [`display`] - writing and printing reports
//!
//! ## Main Entry Point
//!
//! ```no_run
//! use cache_failure_report::{CacheReportAnalyzer, Config, JsonlPageFetcher, TimeRange};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let fetcher = JsonlPageFetcher::new("steps.jsonl", config.source.page_size);
//! let analyzer = CacheReportAnalyzer::from_config(fetcher, &config);
//!
//! let range = TimeRange::parse("2025-10-08", "2025-10-08")?;
//! let reports = analyzer.aggregate_report(Some(&range)).await?;
//! println!("{} steps, {} misses", reports.overall.total_step_runs, reports.overall.cache_miss.count);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod models;
pub mod persist;
pub mod report;
pub mod source;
pub mod time_range;
pub mod timestamp_parser;

pub use aggregator::{AggregationBucket, Aggregator};
pub use analyzer::{AnalyzerOptions, CacheReportAnalyzer};
pub use classifier::{PriorityClassifier, DEFAULT_SIMILARITY_THRESHOLD};
pub use config::Config;
pub use error::{MalformedRecord, ReportError, Result};
pub use models::{Category, ClassificationResult, Diagnostic, SimilarityCandidate, StepKind, StepRecord};
pub use report::{Report, ReportRenderer, ReportSet, ScanSummary};
#[cfg(feature = "http")]
pub use source::HttpScanFetcher;
pub use source::{InMemoryPageFetcher, JsonlPageFetcher, PageFetcher, RecordSource, SourceFilter, SourceItem};
pub use time_range::TimeRange;
