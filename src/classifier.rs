//! Priority Classifier
//!
//! Maps one [`StepRecord`] to exactly one [`Category`] by evaluating the twelve
//! predicates in priority order and returning the first that holds.
//! `Unclassified` always holds, so the mapping is total.
//!
//! | Priority | Category | Predicate |
//! |---|---|---|
//! | 0 | `undoable` | model output contains `undoable` (any case) |
//! | 1 | `unblocker_call` | `is_blocker`, or model output contains `unblock` |
//! | 2 | `ocr_steps` | OCR output present and non-empty |
//! | 3 | `dynamic_step` | ensemble flag set |
//! | 4 | `null_llm_output` | model output absent or empty |
//! | 5 | `failed_step` | execution status is `FAILED` |
//! | 6 | `cache_read_status_none` | cache read status absent |
//! | 7 | `no_cache_documents_found` | status is `-1`, or no candidates at all |
//! | 8 | `less_similarity_threshold` | candidates exist and all score below threshold |
//! | 9 | `failed_at_cand_nos_after_must_match_filter` | no candidate passed the must-match filter |
//! | 10 | `failed_after_similar_document_...` | a candidate reaches the threshold but none of those was used |
//! | 11 | `unclassified` | always |
//!
//! The classifier is pure: no I/O, no interior state, and the threshold is
//! fixed at construction.

use crate::models::{Category, CategoryCheck, ClassificationResult, Diagnostic, StepRecord};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct PriorityClassifier {
    similarity_threshold: f64,
    diagnostics: bool,
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl PriorityClassifier {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            diagnostics: false,
        }
    }

    /// Attach a full diagnostic to every result, not only unclassified ones.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn classify(&self, record: &StepRecord) -> ClassificationResult {
        let category = self.category_of(record);

        let diagnostic = if self.diagnostics || category == Category::Unclassified {
            Some(self.diagnose(record))
        } else {
            None
        };

        tracing::trace!(step_id = %record.step_id, category = %category, "Classified step");

        ClassificationResult {
            step_id: record.step_id.clone(),
            category,
            diagnostic,
        }
    }

    /// Category only, without building a diagnostic.
    pub fn category_of(&self, record: &StepRecord) -> Category {
        Category::ALL
            .into_iter()
            .find(|category| self.matches(*category, record))
            .unwrap_or(Category::Unclassified)
    }

    /// Evaluate every predicate independently of priority.
    pub fn diagnose(&self, record: &StepRecord) -> Diagnostic {
        let category_checks = Category::ALL
            .into_iter()
            .map(|category| CategoryCheck {
                category,
                passed: self.matches(category, record),
                reason: self.reason(category, record),
            })
            .collect();

        Diagnostic {
            step_id: record.step_id.clone(),
            step_classification: record
                .step_classification
                .as_ref()
                .map(|kind| kind.as_str().to_string()),
            cache_read_status: record.cache_read_status,
            test_step_status: record.test_step_status.clone(),
            has_similarity_candidates: !record.similarity_candidates.is_empty(),
            has_ocr_output: has_ocr_output(record),
            is_blocker: record.is_blocker,
            category_checks,
        }
    }

    fn matches(&self, category: Category, record: &StepRecord) -> bool {
        let threshold = self.similarity_threshold;
        let candidates = &record.similarity_candidates;

        match category {
            Category::Undoable => model_output_contains(record, "undoable"),
            Category::UnblockerCall => record.is_blocker || model_output_contains(record, "unblock"),
            Category::OcrStep => has_ocr_output(record),
            Category::DynamicStep => record.ensemble_used,
            Category::NullModelOutput => record
                .llm_output
                .as_deref()
                .map_or(true, str::is_empty),
            Category::FailedStep => record.test_step_status.as_deref() == Some("FAILED"),
            Category::CacheReadStatusNone => record.cache_read_status.is_none(),
            Category::NoCacheDocumentsFound => {
                record.cache_read_status == Some(-1) || candidates.is_empty()
            }
            Category::BelowSimilarityThreshold => {
                !candidates.is_empty()
                    && candidates.iter().all(|c| c.similarity_score < threshold)
            }
            Category::FailedMustMatchFilter => {
                !candidates.iter().any(|c| c.passed_must_match_filter)
            }
            Category::FailedAfterSimilarDocument => {
                let mut similar = candidates
                    .iter()
                    .filter(|c| c.similarity_score >= threshold)
                    .peekable();
                similar.peek().is_some() && similar.all(|c| !c.is_used)
            }
            Category::Unclassified => true,
        }
    }

    fn reason(&self, category: Category, record: &StepRecord) -> String {
        let threshold = self.similarity_threshold;
        let candidates = &record.similarity_candidates;

        match category {
            Category::Undoable | Category::UnblockerCall | Category::NullModelOutput => {
                let blocker = if category == Category::UnblockerCall {
                    format!("is_blocker={}, ", record.is_blocker)
                } else {
                    String::new()
                };
                match record.llm_output.as_deref() {
                    None => format!("{blocker}llm_output absent"),
                    Some("") => format!("{blocker}llm_output empty"),
                    Some(output) => format!("{blocker}llm_output present ({} chars)", output.chars().count()),
                }
            }
            Category::OcrStep => format!(
                "ocr_output={}",
                if has_ocr_output(record) { "present" } else { "absent" }
            ),
            Category::DynamicStep => format!("ensemble_used={}", record.ensemble_used),
            Category::FailedStep => format!(
                "test_step_status={}",
                record.test_step_status.as_deref().unwrap_or("None")
            ),
            Category::CacheReadStatusNone => format!(
                "cache_read_status field {}",
                if record.cache_read_status.is_none() { "missing" } else { "present" }
            ),
            Category::NoCacheDocumentsFound => format!(
                "cache_read_status={}, candidates={}",
                status_text(record.cache_read_status),
                candidates.len()
            ),
            Category::BelowSimilarityThreshold => {
                let below = candidates.iter().filter(|c| c.similarity_score < threshold).count();
                format!("{below}/{} candidates below {threshold}", candidates.len())
            }
            Category::FailedMustMatchFilter => {
                let passed = candidates.iter().filter(|c| c.passed_must_match_filter).count();
                format!("{passed}/{} candidates passed must_match_filter", candidates.len())
            }
            Category::FailedAfterSimilarDocument => {
                let similar = candidates.iter().filter(|c| c.similarity_score >= threshold);
                let (count, used) = similar.fold((0, 0), |(count, used), c| {
                    (count + 1, used + usize::from(c.is_used))
                });
                format!("{count} candidates at or above {threshold}, {used} used")
            }
            Category::Unclassified => "no higher-priority predicate matched".to_string(),
        }
    }
}

fn model_output_contains(record: &StepRecord, needle: &str) -> bool {
    record
        .llm_output
        .as_deref()
        .is_some_and(|output| output.to_lowercase().contains(needle))
}

fn has_ocr_output(record: &StepRecord) -> bool {
    record
        .ocr_output
        .as_deref()
        .is_some_and(|output| !output.is_empty())
}

fn status_text(status: Option<i64>) -> String {
    status.map_or_else(|| "None".to_string(), |s| s.to_string())
}
