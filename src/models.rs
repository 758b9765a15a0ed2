//! Core Data Models
//!
//! This module defines the data structures that flow through the classification
//! pipeline, from a raw step record to its single-category classification.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`StepRecord`] - one test-automation step decoded from the source
//! 2. **Classification**: [`ClassificationResult`] - the step's single [`Category`]
//!    plus an optional [`Diagnostic`]
//! 3. **Aggregation / Reports**: see [`crate::aggregator`] and [`crate::report`]
//!
//! ## Optional Fields
//!
//! Upstream data is semi-structured, so every field except the identifier is an
//! explicit `Option` (or defaults to `false` for flags). The classifier's
//! predicates are written against these options; absence of `cache_read_status`
//! is distinct from it being present with the value `-1`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Step kind used by the source pre-filter. It is never a category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Tap,
    Text,
    /// Any other value seen upstream, preserved for distributions.
    Other(String),
}

impl From<String> for StepKind {
    fn from(value: String) -> Self {
        StepKind::parse(&value)
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl StepKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "TAP" => StepKind::Tap,
            "TEXT" => StepKind::Text,
            other => StepKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Tap => "TAP",
            StepKind::Text => "TEXT",
            StepKind::Other(value) => value,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document returned by the similarity lookup for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityCandidate {
    /// Similarity in `[0, 1]`.
    pub similarity_score: f64,
    /// Whether any component candidates survived the must-match filter.
    pub passed_must_match_filter: bool,
    /// Whether this document was the one finally used.
    pub is_used: bool,
}

/// One test-execution step as retrieved from the source.
///
/// Constructed once per retrieved item and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_classification: Option<StepKind>,
    pub cache_read_status: Option<i64>,
    /// Cache lookup latency in seconds.
    pub cache_read_latency: Option<f64>,
    pub test_step_status: Option<String>,
    /// Raw creation timestamp as stored upstream (UTC). Parsed lazily so that a
    /// malformed value never prevents classification.
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_blocker: bool,
    pub ocr_output: Option<String>,
    pub llm_output: Option<String>,
    #[serde(default)]
    pub ensemble_used: bool,
    #[serde(default)]
    pub similarity_candidates: Vec<SimilarityCandidate>,
    pub app_package: Option<String>,
    pub command: Option<String>,
    pub thread_code: Option<String>,
}

impl StepRecord {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            ..Self::default()
        }
    }

    /// Command label used as the primary bucket key.
    pub fn command_key(&self) -> &str {
        non_empty(self.command.as_deref()).unwrap_or("UNKNOWN_COMMAND")
    }

    /// Package label used as the secondary bucket key.
    pub fn package_key(&self) -> &str {
        non_empty(self.app_package.as_deref()).unwrap_or("UNKNOWN_PACKAGE")
    }

    /// A cache hit is a present, positive read status. Everything else,
    /// including an absent status, is a miss.
    pub fn is_cache_hit(&self) -> bool {
        matches!(self.cache_read_status, Some(status) if status > 0)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// The 12 mutually exclusive outcome categories, in priority order.
///
/// The declaration order is the evaluation order of the classifier and the
/// order of every breakdown in a report. Reordering variants is a breaking
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Undoable,
    UnblockerCall,
    #[serde(rename = "ocr_steps")]
    OcrStep,
    DynamicStep,
    #[serde(rename = "null_llm_output")]
    NullModelOutput,
    FailedStep,
    CacheReadStatusNone,
    NoCacheDocumentsFound,
    #[serde(rename = "less_similarity_threshold")]
    BelowSimilarityThreshold,
    #[serde(rename = "failed_at_cand_nos_after_must_match_filter")]
    FailedMustMatchFilter,
    #[serde(rename = "failed_after_similar_document_found_with_threshold_after_must_match_filter")]
    FailedAfterSimilarDocument,
    Unclassified,
}

impl Category {
    pub const COUNT: usize = 12;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Undoable,
        Category::UnblockerCall,
        Category::OcrStep,
        Category::DynamicStep,
        Category::NullModelOutput,
        Category::FailedStep,
        Category::CacheReadStatusNone,
        Category::NoCacheDocumentsFound,
        Category::BelowSimilarityThreshold,
        Category::FailedMustMatchFilter,
        Category::FailedAfterSimilarDocument,
        Category::Unclassified,
    ];

    /// Priority, 0 being evaluated first.
    pub fn priority(self) -> usize {
        self as usize
    }

    /// Stable report key.
    pub fn name(self) -> &'static str {
        match self {
            Category::Undoable => "undoable",
            Category::UnblockerCall => "unblocker_call",
            Category::OcrStep => "ocr_steps",
            Category::DynamicStep => "dynamic_step",
            Category::NullModelOutput => "null_llm_output",
            Category::FailedStep => "failed_step",
            Category::CacheReadStatusNone => "cache_read_status_none",
            Category::NoCacheDocumentsFound => "no_cache_documents_found",
            Category::BelowSimilarityThreshold => "less_similarity_threshold",
            Category::FailedMustMatchFilter => "failed_at_cand_nos_after_must_match_filter",
            Category::FailedAfterSimilarDocument => {
                "failed_after_similar_document_found_with_threshold_after_must_match_filter"
            }
            Category::Unclassified => "unclassified",
        }
    }

    /// Human-readable explanation shown in breakdowns when diagnostics are on.
    pub fn description(self) -> &'static str {
        match self {
            Category::Undoable => "Step was undoable, no cache needed",
            Category::UnblockerCall => "Unblocker call made, no cache needed",
            Category::OcrStep => "OCR was used for step execution, no cache needed",
            Category::DynamicStep => "Dynamic component resolution used, no cache needed",
            Category::NullModelOutput => "No LLM output generated, no cache needed",
            Category::FailedStep => "Step execution failed, no cache needed",
            Category::CacheReadStatusNone => "Cache was never attempted (dynamic resolution)",
            Category::NoCacheDocumentsFound => {
                "Vector DB found no similar screenshots (cache_read_status=-1 or no candidates)"
            }
            Category::BelowSimilarityThreshold => {
                "Found similar documents but every similarity is below the threshold"
            }
            Category::FailedMustMatchFilter => "Component selection failed at must_match_filter stage",
            Category::FailedAfterSimilarDocument => {
                "Failed after finding similar document with good similarity"
            }
            Category::Unclassified => "Unclassified cache miss reason",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one predicate, recorded when a diagnostic is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCheck {
    pub category: Category,
    pub passed: bool,
    pub reason: String,
}

/// Every predicate's outcome for one record, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub step_id: String,
    pub step_classification: Option<String>,
    pub cache_read_status: Option<i64>,
    pub test_step_status: Option<String>,
    pub has_similarity_candidates: bool,
    pub has_ocr_output: bool,
    pub is_blocker: bool,
    pub category_checks: Vec<CategoryCheck>,
}

impl Diagnostic {
    pub fn passed(&self) -> impl Iterator<Item = Category> + '_ {
        self.category_checks
            .iter()
            .filter(|check| check.passed)
            .map(|check| check.category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub step_id: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_order_matches_priority() {
        for (index, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.priority(), index);
        }
        assert!(Category::UnblockerCall < Category::FailedStep);
    }

    #[test]
    fn test_category_names_round_trip_through_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.name()));
            assert_eq!(Category::from_name(category.name()), Some(category));
        }
    }

    #[test]
    fn test_cache_hit_requires_positive_status() {
        let mut record = StepRecord::new("s1");
        assert!(!record.is_cache_hit());
        record.cache_read_status = Some(0);
        assert!(!record.is_cache_hit());
        record.cache_read_status = Some(-1);
        assert!(!record.is_cache_hit());
        record.cache_read_status = Some(1);
        assert!(record.is_cache_hit());
    }

    #[test]
    fn test_bucket_keys_fall_back_for_missing_labels() {
        let mut record = StepRecord::new("s1");
        assert_eq!(record.command_key(), "UNKNOWN_COMMAND");
        assert_eq!(record.package_key(), "UNKNOWN_PACKAGE");
        record.command = Some("Tap on Login".into());
        record.app_package = Some("  ".into());
        assert_eq!(record.command_key(), "Tap on Login");
        assert_eq!(record.package_key(), "UNKNOWN_PACKAGE");
    }

    #[test]
    fn test_step_kind_parse() {
        assert_eq!(StepKind::parse("TAP"), StepKind::Tap);
        assert_eq!(StepKind::parse("TEXT"), StepKind::Text);
        assert_eq!(StepKind::parse("SCROLL").as_str(), "SCROLL");
    }
}
