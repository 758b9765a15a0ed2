//! Aggregator
//!
//! Consumes the record stream exactly once. Every record is classified and
//! folded into three buckets: the overall bucket, its command bucket and its
//! (command, package) bucket. Buckets are created on first sight of a key.
//!
//! Cache hit/miss is decided from the read status alone; only misses contribute
//! their category to the breakdown.
//!
//! Unclassified misses are tallied into [`UnclassifiedPatterns`], logged as a
//! closing summary. Their full diagnostics are kept only when requested.

use std::collections::BTreeMap;

use futures::{pin_mut, Stream, TryStreamExt};
use tracing::{debug, info, warn};

use crate::classifier::PriorityClassifier;
use crate::error::Result;
use crate::models::{Category, Diagnostic, StepRecord};
use crate::source::SourceItem;
use crate::timestamp_parser::TimestampParser;

/// Step identifiers kept per outcome when capture is enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepIdCapture {
    pub hits: Vec<String>,
    pub misses: [Vec<String>; Category::COUNT],
}

/// Accumulated counts for one bucket key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationBucket {
    pub total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Misses whose read status is exactly `0`.
    pub cache_hit_without_component: u64,
    pub latency_sum: f64,
    pub latency_count: u64,
    /// Miss counts indexed by [`Category::priority`].
    pub category_counts: [u64; Category::COUNT],
    pub app_packages: BTreeMap<String, u64>,
    pub step_classifications: BTreeMap<String, u64>,
    pub test_step_status: BTreeMap<String, u64>,
    /// Keyed by civil `YYYY-MM-DD`, `unknown` when the timestamp is unusable.
    pub date_distribution: BTreeMap<String, u64>,
    pub step_ids: Option<StepIdCapture>,
}

impl AggregationBucket {
    pub fn new(capture_step_ids: bool) -> Self {
        Self {
            step_ids: capture_step_ids.then(StepIdCapture::default),
            ..Self::default()
        }
    }

    pub fn category_count(&self, category: Category) -> u64 {
        self.category_counts[category.priority()]
    }

    pub fn average_latency(&self) -> Option<f64> {
        (self.latency_count > 0).then(|| self.latency_sum / self.latency_count as f64)
    }

    /// Key with the highest count; ties go to the lexicographically smallest.
    pub fn most_common_package(&self) -> Option<&str> {
        self.app_packages
            .iter()
            .fold(None::<(&String, u64)>, |best, (package, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((package, count)),
            })
            .map(|(package, _)| package.as_str())
    }

    fn record(&mut self, record: &StepRecord, category: Category, date_key: &str) {
        self.total += 1;

        if record.is_cache_hit() {
            self.cache_hits += 1;
            if let Some(latency) = record.cache_read_latency.filter(|l| l.is_finite()) {
                self.latency_sum += latency;
                self.latency_count += 1;
            }
            if let Some(ids) = self.step_ids.as_mut() {
                ids.hits.push(record.step_id.clone());
            }
        } else {
            self.cache_misses += 1;
            self.category_counts[category.priority()] += 1;
            if record.cache_read_status == Some(0) {
                self.cache_hit_without_component += 1;
            }
            if let Some(ids) = self.step_ids.as_mut() {
                ids.misses[category.priority()].push(record.step_id.clone());
            }
        }

        bump(&mut self.app_packages, record.package_key());
        bump(
            &mut self.step_classifications,
            record
                .step_classification
                .as_ref()
                .map_or("UNKNOWN", |kind| kind.as_str()),
        );
        bump(
            &mut self.test_step_status,
            record.test_step_status.as_deref().unwrap_or("UNKNOWN"),
        );
        bump(&mut self.date_distribution, date_key);
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    match map.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            map.insert(key.to_string(), 1);
        }
    }
}

/// Shared traits of unclassified misses, used to spot a missing category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnclassifiedPatterns {
    pub count: u64,
    /// Keyed by status, `None` when absent.
    pub by_cache_read_status: BTreeMap<String, u64>,
    /// Keyed by execution status, `None` when absent.
    pub by_test_step_status: BTreeMap<String, u64>,
    pub with_query_results: u64,
    pub with_ocr_output: u64,
    pub blockers: u64,
}

impl UnclassifiedPatterns {
    fn observe(&mut self, diagnostic: &Diagnostic) {
        self.count += 1;
        let status = diagnostic
            .cache_read_status
            .map_or_else(|| "None".to_string(), |status| status.to_string());
        bump(&mut self.by_cache_read_status, &status);
        bump(
            &mut self.by_test_step_status,
            diagnostic.test_step_status.as_deref().unwrap_or("None"),
        );
        self.with_query_results += u64::from(diagnostic.has_similarity_candidates);
        self.with_ocr_output += u64::from(diagnostic.has_ocr_output);
        self.blockers += u64::from(diagnostic.is_blocker);
    }

    fn log(&self, records_processed: u64) {
        if self.count == 0 {
            return;
        }
        warn!(
            unclassified = self.count,
            share = %format!("{:.2}%", self.count as f64 * 100.0 / records_processed.max(1) as f64),
            "Unclassified summary"
        );
        warn!(
            by_cache_read_status = ?self.by_cache_read_status,
            by_test_step_status = ?self.by_test_step_status,
            with_query_results = self.with_query_results,
            with_ocr_output = self.with_ocr_output,
            blockers = self.blockers,
            "Unclassified patterns"
        );
    }
}

/// Finalized buckets of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub overall: AggregationBucket,
    pub by_command: BTreeMap<String, AggregationBucket>,
    pub by_command_package: BTreeMap<(String, String), AggregationBucket>,
    pub records_processed: u64,
    pub skipped_records: u64,
    pub unclassified: UnclassifiedPatterns,
    /// Empty unless diagnostics collection was enabled.
    pub unclassified_diagnostics: Vec<Diagnostic>,
}

/// Single-writer accumulator for one pass. Not shared between invocations.
pub struct Aggregator {
    classifier: PriorityClassifier,
    capture_step_ids: bool,
    collect_diagnostics: bool,
    progress_every_records: u64,
    state: Aggregation,
}

impl Aggregator {
    pub fn new(classifier: PriorityClassifier) -> Self {
        Self {
            classifier,
            capture_step_ids: false,
            collect_diagnostics: false,
            progress_every_records: 1000,
            state: Aggregation::default(),
        }
    }

    pub fn with_step_id_capture(mut self, enabled: bool) -> Self {
        self.capture_step_ids = enabled;
        self.state.overall = AggregationBucket::new(enabled);
        self
    }

    /// Keep the diagnostic of every unclassified miss for the report set.
    pub fn with_unclassified_diagnostics(mut self, enabled: bool) -> Self {
        self.collect_diagnostics = enabled;
        self
    }

    pub fn with_progress_interval(mut self, records: u64) -> Self {
        self.progress_every_records = records.max(1);
        self
    }

    /// Drain the stream, stopping at the first source error.
    pub async fn aggregate<S>(mut self, records: S) -> Result<Aggregation>
    where
        S: Stream<Item = Result<SourceItem>>,
    {
        pin_mut!(records);
        while let Some(item) = records.try_next().await? {
            self.observe(item);
        }
        Ok(self.finish())
    }

    pub fn observe(&mut self, item: SourceItem) {
        match item {
            SourceItem::Step(record) => self.observe_record(&record),
            SourceItem::Malformed(malformed) => {
                debug!(step_id = ?malformed.step_id, reason = %malformed.reason, "Counting skipped record");
                self.state.skipped_records += 1;
            }
        }
    }

    pub fn observe_record(&mut self, record: &StepRecord) {
        let result = self.classifier.classify(record);
        let category = result.category;

        if !record.is_cache_hit() && category == Category::Unclassified {
            warn!(
                step_id = %record.step_id,
                diagnostic = ?result.diagnostic,
                "Unclassified cache miss"
            );
            if let Some(diagnostic) = result.diagnostic {
                self.state.unclassified.observe(&diagnostic);
                if self.collect_diagnostics {
                    self.state.unclassified_diagnostics.push(diagnostic);
                }
            }
        }

        let date_key = record
            .created_at
            .as_deref()
            .and_then(TimestampParser::civil_date_key)
            .unwrap_or_else(|| "unknown".to_string());

        let capture = self.capture_step_ids;
        let command = record.command_key();
        let package = record.package_key();

        self.state.overall.record(record, category, &date_key);
        self.state
            .by_command
            .entry(command.to_string())
            .or_insert_with(|| AggregationBucket::new(capture))
            .record(record, category, &date_key);
        self.state
            .by_command_package
            .entry((command.to_string(), package.to_string()))
            .or_insert_with(|| AggregationBucket::new(capture))
            .record(record, category, &date_key);

        self.state.records_processed += 1;
        if self.state.records_processed % self.progress_every_records == 0 {
            info!(
                processed = self.state.records_processed,
                commands = self.state.by_command.len(),
                "Aggregation progress"
            );
        }
    }

    pub fn finish(self) -> Aggregation {
        info!(
            processed = self.state.records_processed,
            skipped = self.state.skipped_records,
            commands = self.state.by_command.len(),
            combinations = self.state.by_command_package.len(),
            "Aggregation finished"
        );
        self.state.unclassified.log(self.state.records_processed);
        self.state
    }
}
