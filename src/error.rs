use std::io;

use serde::Serialize;
use thiserror::Error;

/// Errors that abort a report invocation.
///
/// Per-record anomalies never surface here; they become [`MalformedRecord`]
/// skip events or an `Unclassified` category instead.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("record source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("invalid time range (start={start}, end={end}): {reason}")]
    InvalidTimeRange {
        start: String,
        end: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReportError {
    pub fn source_unavailable(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        ReportError::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_range(
        start: impl Into<String>,
        end: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ReportError::InvalidTimeRange {
            start: start.into(),
            end: end.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ReportError>;

/// A retrieved item that cannot be turned into a [`crate::models::StepRecord`].
///
/// Recorded as a skipped-record event and excluded from totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRecord {
    pub step_id: Option<String>,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(step_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id,
            reason: reason.into(),
        }
    }
}
