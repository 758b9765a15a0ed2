//! Report Renderer
//!
//! Turns a finalized [`AggregationBucket`] into an immutable [`Report`].
//! Percentages are computed in basis points and distributed with the
//! largest-remainder method, so every breakdown whose total is non-zero
//! renders values summing to exactly `100.00%`. A zero total renders every
//! entry as `0.00%`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::aggregator::{Aggregation, AggregationBucket};
use crate::models::{Category, Diagnostic};
use crate::time_range::TimeRange;

const BASIS_POINTS: u64 = 10_000;

/// Format basis points as `NN.NN%`.
fn format_basis_points(bp: u64) -> String {
    format!("{}.{:02}%", bp / 100, bp % 100)
}

/// Share of `total` rounded half up, for standalone percentages.
pub fn percentage(count: u64, total: u64) -> String {
    if total == 0 {
        return format_basis_points(0);
    }
    let scaled = u128::from(count) * u128::from(BASIS_POINTS);
    let total = u128::from(total);
    format_basis_points(((scaled * 2 + total) / (total * 2)) as u64)
}

/// Percentages of `counts` over their sum, corrected with the largest-remainder
/// method. Remainder ties favour the earlier entry.
pub fn normalized_percentages(counts: &[u64]) -> Vec<String> {
    let total: u128 = counts.iter().map(|&c| u128::from(c)).sum();
    if total == 0 {
        return counts.iter().map(|_| format_basis_points(0)).collect();
    }

    let mut shares: Vec<(u64, u128)> = counts
        .iter()
        .map(|&count| {
            let scaled = u128::from(count) * u128::from(BASIS_POINTS);
            ((scaled / total) as u64, scaled % total)
        })
        .collect();

    let assigned: u64 = shares.iter().map(|(floor, _)| floor).sum();
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| shares[b].1.cmp(&shares[a].1).then(a.cmp(&b)));

    for &index in order.iter().take((BASIS_POINTS - assigned) as usize) {
        shares[index].0 += 1;
    }

    shares
        .into_iter()
        .map(|(bp, _)| format_basis_points(bp))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHitSummary {
    pub count: u64,
    pub percentage: String,
    /// Seconds, averaged over hits that carry a latency. `None` when none do.
    pub average_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub count: u64,
    pub percentage: String,
    /// Empty unless diagnostics were requested.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_list: Option<Vec<String>>,
}

/// The twelve miss categories, always serialized in priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    entries: [BreakdownEntry; Category::COUNT],
}

impl Breakdown {
    pub fn get(&self, category: Category) -> &BreakdownEntry {
        &self.entries[category.priority()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &BreakdownEntry)> {
        Category::ALL.into_iter().zip(self.entries.iter())
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|entry| entry.count).sum()
    }
}

impl Serialize for Breakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Category::COUNT))?;
        for (category, entry) in self.iter() {
            map.serialize_entry(category.name(), entry)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMissSummary {
    pub count: u64,
    pub percentage: String,
    pub breakdown: Breakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub count: u64,
    pub percentage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,
    pub total_step_runs: u64,
    pub most_common_package: Option<String>,
    pub date_range: DateRange,
    pub cache_hit: CacheHitSummary,
    pub cache_miss: CacheMissSummary,
    pub cache_hit_without_component: Share,
    pub app_package_distribution: BTreeMap<String, u64>,
    pub step_classifications: BTreeMap<String, u64>,
    pub test_step_status: BTreeMap<String, u64>,
    pub date_distribution: BTreeMap<String, u64>,
}

impl Report {
    /// Check the count invariants of a rendered report.
    pub fn validate(&self) -> Result<(), String> {
        let hit_and_miss = self.cache_hit.count + self.cache_miss.count;
        if hit_and_miss != self.total_step_runs {
            return Err(format!(
                "cache hits ({}) + misses ({}) != total ({})",
                self.cache_hit.count, self.cache_miss.count, self.total_step_runs
            ));
        }
        let breakdown = self.cache_miss.breakdown.total();
        if breakdown != self.cache_miss.count {
            return Err(format!(
                "breakdown sum ({breakdown}) != cache misses ({})",
                self.cache_miss.count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportRenderer {
    diagnostics: bool,
}

impl ReportRenderer {
    pub fn new(diagnostics: bool) -> Self {
        Self { diagnostics }
    }

    pub fn render(&self, bucket: &AggregationBucket) -> Report {
        let hit_miss = normalized_percentages(&[bucket.cache_hits, bucket.cache_misses]);
        let [hit_pct, miss_pct]: [String; 2] = match hit_miss.try_into() {
            Ok(pair) => pair,
            Err(_) => [percentage(0, 0), percentage(0, 0)],
        };

        let miss_pcts = normalized_percentages(&bucket.category_counts);
        let entries: [BreakdownEntry; Category::COUNT] = std::array::from_fn(|i| {
            let category = Category::ALL[i];
            BreakdownEntry {
                count: bucket.category_counts[i],
                percentage: miss_pcts[i].clone(),
                reason: if self.diagnostics {
                    category.description().to_string()
                } else {
                    String::new()
                },
                steps_list: bucket.step_ids.as_ref().map(|ids| ids.misses[i].clone()),
            }
        });

        let known_dates = bucket
            .date_distribution
            .keys()
            .filter(|date| date.as_str() != "unknown");

        Report {
            command: None,
            app_package: None,
            total_step_runs: bucket.total,
            most_common_package: bucket.most_common_package().map(str::to_string),
            date_range: DateRange {
                start: known_dates.clone().next().cloned(),
                end: known_dates.last().cloned(),
            },
            cache_hit: CacheHitSummary {
                count: bucket.cache_hits,
                percentage: hit_pct,
                average_latency: bucket.average_latency(),
                steps_list: bucket.step_ids.as_ref().map(|ids| ids.hits.clone()),
            },
            cache_miss: CacheMissSummary {
                count: bucket.cache_misses,
                percentage: miss_pct,
                breakdown: Breakdown { entries },
            },
            cache_hit_without_component: Share {
                count: bucket.cache_hit_without_component,
                percentage: percentage(bucket.cache_hit_without_component, bucket.total),
            },
            app_package_distribution: bucket.app_packages.clone(),
            step_classifications: bucket.step_classifications.clone(),
            test_step_status: bucket.test_step_status.clone(),
            date_distribution: bucket.date_distribution.clone(),
        }
    }

    /// Render every bucket of a finished pass.
    pub fn render_set(&self, aggregation: &Aggregation, summary: ScanSummary) -> ReportSet {
        let by_command = aggregation
            .by_command
            .iter()
            .map(|(command, bucket)| Report {
                command: Some(command.clone()),
                ..self.render(bucket)
            })
            .collect();

        let by_command_package = aggregation
            .by_command_package
            .iter()
            .map(|((command, package), bucket)| Report {
                command: Some(command.clone()),
                app_package: Some(package.clone()),
                ..self.render(bucket)
            })
            .collect();

        ReportSet {
            summary,
            overall: self.render(&aggregation.overall),
            by_command,
            by_command_package,
            unclassified_diagnostics: aggregation.unclassified_diagnostics.clone(),
        }
    }
}

/// Bookkeeping for one `aggregate_report` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub run_id: String,
    pub source: String,
    pub time_range: Option<TimeRange>,
    pub similarity_threshold: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub pages_fetched: u64,
    pub records_processed: u64,
    pub skipped_records: u64,
    pub unclassified_records: u64,
    pub unique_commands: usize,
    pub command_package_combinations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSet {
    pub summary: ScanSummary,
    pub overall: Report,
    /// Ordered by command.
    pub by_command: Vec<Report>,
    /// Ordered by (command, package).
    pub by_command_package: Vec<Report>,
    /// One per unclassified miss, filled only in diagnostics mode.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unclassified_diagnostics: Vec<Diagnostic>,
}

impl ReportSet {
    pub fn command(&self, command: &str) -> Option<&Report> {
        self.by_command
            .iter()
            .find(|report| report.command.as_deref() == Some(command))
    }

    pub fn command_package(&self, command: &str, package: &str) -> Option<&Report> {
        self.by_command_package.iter().find(|report| {
            report.command.as_deref() == Some(command) && report.app_package.as_deref() == Some(package)
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        std::iter::once(&self.overall)
            .chain(&self.by_command)
            .chain(&self.by_command_package)
            .try_for_each(Report::validate)
    }
}
