//! Raw item decoding.
//!
//! Items arrive either in the typed attribute shape of a key-value store scan
//! (`{"field": {"S": "..."}}`, `{"N": "1"}`, `{"BOOL": true}`, `{"NULL": true}`,
//! `{"L": [...]}`, `{"M": {...}}`) or as plain JSON objects. Both are reduced to
//! plain JSON first and then read field by field. Only a non-object item or a
//! missing `step_id` makes a record malformed; every other oddity degrades to
//! an absent field.

use serde_json::{Map, Number, Value};

use crate::error::MalformedRecord;
use crate::models::{SimilarityCandidate, StepKind, StepRecord};

const TYPE_TAGS: [&str; 8] = ["S", "N", "BOOL", "NULL", "L", "M", "SS", "NS"];

/// Placeholder upstream writes when no OCR text was produced.
const OCR_ABSENT_MARKER: &str = "NA";

pub fn decode_item(raw: &Value) -> Result<StepRecord, MalformedRecord> {
    let Value::Object(fields) = raw else {
        return Err(MalformedRecord::new(None, "item is not a JSON object"));
    };

    let fields: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), unwrap_attribute(value)))
        .collect();

    let step_id = match fields.get("step_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        Some(_) => return Err(MalformedRecord::new(None, "step_id is empty or not a string")),
        None => return Err(MalformedRecord::new(None, "missing step_id")),
    };

    Ok(StepRecord {
        step_classification: string_field(&fields, "step_classification")
            .map(|kind| StepKind::parse(&kind)),
        cache_read_status: integer_field(&fields, "cache_read_status"),
        cache_read_latency: float_field(&fields, "cache_read_latency"),
        test_step_status: string_field(&fields, "test_step_status"),
        created_at: string_field(&fields, "created_at"),
        is_blocker: bool_field(&fields, "is_blocker"),
        ocr_output: string_field(&fields, "ocr_output").filter(|ocr| ocr != OCR_ABSENT_MARKER),
        llm_output: string_field(&fields, "llm_output"),
        ensemble_used: bool_field(&fields, "ensemble_used"),
        similarity_candidates: fields
            .get("cache_query_results")
            .map(parse_candidates)
            .unwrap_or_default(),
        app_package: string_field(&fields, "app_package"),
        command: string_field(&fields, "command"),
        thread_code: string_field(&fields, "thread_code"),
        step_id,
    })
}

/// Reduce a typed attribute to plain JSON. Values without a single type tag
/// are returned unchanged.
fn unwrap_attribute(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut entries = map.iter();
    let (Some((tag, inner)), None) = (entries.next(), entries.next()) else {
        return value.clone();
    };
    if !TYPE_TAGS.contains(&tag.as_str()) {
        return value.clone();
    }

    match (tag.as_str(), inner) {
        ("S", Value::String(s)) => Value::String(s.clone()),
        ("N", Value::String(n)) => parse_number(n).map_or(Value::Null, Value::Number),
        ("N", Value::Number(n)) => Value::Number(n.clone()),
        ("BOOL", Value::Bool(b)) => Value::Bool(*b),
        ("NULL", _) => Value::Null,
        ("L", Value::Array(items)) | ("SS", Value::Array(items)) | ("NS", Value::Array(items)) => {
            Value::Array(items.iter().map(unwrap_attribute).collect())
        }
        ("M", Value::Object(inner)) => Value::Object(
            inner
                .iter()
                .map(|(k, v)| (k.clone(), unwrap_attribute(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some(Number::from(int));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn integer_field(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    match fields.get(name)? {
        Value::Number(n) => as_integer(n),
        Value::String(s) => parse_number(s).as_ref().and_then(as_integer),
        _ => None,
    }
}

/// Whole floats such as `1.0` count as integers.
fn as_integer(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn float_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Booleans sometimes arrive as strings; anything unrecognized is `false`.
fn bool_field(fields: &Map<String, Value>, name: &str) -> bool {
    match fields.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Candidates are stored as a JSON array, usually serialized into a string.
/// Unparseable content yields no candidates.
fn parse_candidates(value: &Value) -> Vec<SimilarityCandidate> {
    let parsed;
    let items = match value {
        Value::Array(items) => items,
        Value::String(text) if !text.trim().is_empty() => {
            parsed = match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => items,
                _ => return Vec::new(),
            };
            &parsed
        }
        _ => return Vec::new(),
    };

    items.iter().filter_map(parse_candidate).collect()
}

fn parse_candidate(value: &Value) -> Option<SimilarityCandidate> {
    let doc = value.as_object()?;

    let similarity_score = doc
        .get("similarity_score")
        .and_then(|score| match score {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0);

    let passed_must_match_filter = match doc.get("passed_must_match_filter") {
        Some(Value::Bool(passed)) => *passed,
        _ => doc
            .get("component_selection_report")
            .and_then(|report| report.get("cand_nos_after_must_match_filter"))
            .and_then(Value::as_f64)
            .is_some_and(|count| count != 0.0),
    };

    Some(SimilarityCandidate {
        similarity_score,
        passed_must_match_filter,
        is_used: doc.get("is_used").and_then(Value::as_bool).unwrap_or(false),
    })
}
