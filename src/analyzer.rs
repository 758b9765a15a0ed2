//! Pipeline entry points.
//!
//! [`CacheReportAnalyzer`] wires a record source, the classifier, the
//! aggregator and the renderer together. Each call to
//! [`CacheReportAnalyzer::aggregate_report`] owns its buckets, so one analyzer
//! can serve concurrent invocations.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::classifier::PriorityClassifier;
use crate::config::Config;
use crate::error::Result;
use crate::models::{ClassificationResult, StepRecord};
use crate::report::{ReportRenderer, ReportSet, ScanSummary};
use crate::source::{PageFetcher, RecordSource, SourceFilter};
use crate::time_range::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerOptions {
    pub diagnostics: bool,
    pub capture_step_ids: bool,
    pub progress_every_records: u64,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            diagnostics: false,
            capture_step_ids: false,
            progress_every_records: 1000,
        }
    }
}

pub struct CacheReportAnalyzer<F> {
    source: RecordSource<F>,
    classifier: PriorityClassifier,
    options: AnalyzerOptions,
}

impl<F: PageFetcher> CacheReportAnalyzer<F> {
    pub fn new(
        source: RecordSource<F>,
        classifier: PriorityClassifier,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            source,
            classifier: classifier.with_diagnostics(options.diagnostics),
            options,
        }
    }

    /// Build from configuration: filter, threshold and report options all come
    /// from `config`.
    pub fn from_config(fetcher: F, config: &Config) -> Self {
        let source = RecordSource::new(fetcher, config.filter.clone())
            .with_progress_interval(config.source.progress_every_pages);
        let options = AnalyzerOptions {
            diagnostics: config.report.diagnostics,
            capture_step_ids: config.report.capture_step_ids,
            progress_every_records: config.report.progress_every_records,
        };
        Self::new(
            source,
            PriorityClassifier::new(config.classifier.similarity_threshold),
            options,
        )
    }

    pub fn classifier(&self) -> &PriorityClassifier {
        &self.classifier
    }

    pub fn filter(&self) -> &SourceFilter {
        self.source.filter()
    }

    /// Fetch, classify, aggregate and render. Either the whole window is
    /// reported or an error is returned; there is no partial result.
    pub async fn aggregate_report(&self, range: Option<&TimeRange>) -> Result<ReportSet> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("aggregate_report", run_id = %run_id, source = %self.source.source_id());

        self.run(range, run_id).instrument(span).await
    }

    async fn run(&self, range: Option<&TimeRange>, run_id: String) -> Result<ReportSet> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let (progress, records) = self.source.fetch(range);
        let aggregation = Aggregator::new(self.classifier.clone())
            .with_step_id_capture(self.options.capture_step_ids)
            .with_unclassified_diagnostics(self.options.diagnostics)
            .with_progress_interval(self.options.progress_every_records)
            .aggregate(records)
            .await?;

        let summary = ScanSummary {
            run_id,
            source: self.source.source_id().to_string(),
            time_range: range.cloned(),
            similarity_threshold: self.classifier.similarity_threshold(),
            started_at,
            completed_at: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
            pages_fetched: progress.pages(),
            records_processed: aggregation.records_processed,
            skipped_records: aggregation.skipped_records,
            unclassified_records: aggregation.unclassified.count,
            unique_commands: aggregation.by_command.len(),
            command_package_combinations: aggregation.by_command_package.len(),
        };

        let reports = ReportRenderer::new(self.options.diagnostics).render_set(&aggregation, summary);

        let consistency = reports.validate();
        if let Err(problem) = &consistency {
            error!(%problem, "Rendered report is inconsistent");
        }
        debug_assert!(consistency.is_ok(), "inconsistent report: {consistency:?}");

        info!(
            total = reports.overall.total_step_runs,
            hits = reports.overall.cache_hit.count,
            misses = reports.overall.cache_miss.count,
            skipped = reports.summary.skipped_records,
            duration_seconds = reports.summary.duration_seconds,
            "Report complete"
        );

        Ok(reports)
    }

    /// Classify a single record with every predicate's outcome attached.
    pub fn classify_one(&self, record: &StepRecord) -> ClassificationResult {
        self.classifier.clone().with_diagnostics(true).classify(record)
    }
}
