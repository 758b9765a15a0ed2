#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use cache_failure_report::source::{ContinuationToken, Page, PageFetcher};
use cache_failure_report::{ReportError, TimeRange};
use futures::future::{self, BoxFuture};
use serde_json::{json, Map, Value};

/// Builds items in the typed attribute shape returned by a table scan.
pub struct ItemBuilder {
    fields: Map<String, Value>,
}

impl ItemBuilder {
    /// A TAP step with model output, a successful execution and a creation
    /// time of 2025-10-08 11:30 civil.
    pub fn new(step_id: &str) -> Self {
        let mut builder = Self { fields: Map::new() };
        builder
            .set("step_id", json!({"S": step_id}))
            .set("step_classification", json!({"S": "TAP"}))
            .set("llm_output", json!({"S": "tap on the login button"}))
            .set("test_step_status", json!({"S": "PASSED"}))
            .set("created_at", json!({"S": "2025-10-08T06:00:00.000000+0000"}))
            .set("command", json!({"S": "Tap on Login"}))
            .set("app_package", json!({"S": "com.example.shop"}));
        builder
    }

    fn set(&mut self, name: &str, value: Value) -> &mut Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.set("step_classification", json!({"S": kind}));
        self
    }

    pub fn status(mut self, status: i64) -> Self {
        self.set("cache_read_status", json!({"N": status.to_string()}));
        self
    }

    pub fn latency(mut self, seconds: f64) -> Self {
        self.set("cache_read_latency", json!({"N": seconds.to_string()}));
        self
    }

    pub fn test_status(mut self, status: &str) -> Self {
        self.set("test_step_status", json!({"S": status}));
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    pub fn created_at(mut self, timestamp: &str) -> Self {
        self.set("created_at", json!({"S": timestamp}));
        self
    }

    pub fn blocker(mut self) -> Self {
        self.set("is_blocker", json!({"BOOL": true}));
        self
    }

    pub fn llm(mut self, output: &str) -> Self {
        self.set("llm_output", json!({"S": output}));
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.set("command", json!({"S": command}));
        self
    }

    pub fn package(mut self, package: &str) -> Self {
        self.set("app_package", json!({"S": package}));
        self
    }

    /// `(similarity_score, cand_nos_after_must_match_filter, is_used)` triples,
    /// stored as the JSON string upstream writes.
    pub fn candidates(mut self, candidates: &[(f64, u64, bool)]) -> Self {
        let docs: Vec<Value> = candidates
            .iter()
            .map(|(score, cand_nos, used)| {
                json!({
                    "similarity_score": score,
                    "is_used": used,
                    "component_selection_report": {"cand_nos_after_must_match_filter": cand_nos}
                })
            })
            .collect();
        self.set("cache_query_results", json!({"S": Value::Array(docs).to_string()}));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

pub fn hit(step_id: &str, latency: Option<f64>) -> Value {
    let builder = ItemBuilder::new(step_id).status(1);
    match latency {
        Some(seconds) => builder.latency(seconds).build(),
        None => builder.build(),
    }
}

pub fn failed_miss(step_id: &str) -> Value {
    ItemBuilder::new(step_id).status(-1).test_status("FAILED").build()
}

/// A miss that passes every predicate check and lands in `unclassified`.
pub fn unclassified_miss(step_id: &str) -> Value {
    ItemBuilder::new(step_id)
        .status(0)
        .candidates(&[(0.92, 3, true)])
        .build()
}

/// Six hits (two with latency 50ms and 150ms), two failed misses and two
/// unclassified misses.
pub fn ten_record_scenario() -> Vec<Value> {
    vec![
        hit("hit-1", Some(0.05)),
        hit("hit-2", Some(0.15)),
        hit("hit-3", None),
        hit("hit-4", None),
        hit("hit-5", None),
        hit("hit-6", None),
        failed_miss("miss-1"),
        failed_miss("miss-2"),
        unclassified_miss("miss-3"),
        unclassified_miss("miss-4"),
    ]
}

pub fn write_jsonl(dir: &Path, filename: &str, items: &[Value]) -> Result<PathBuf> {
    let path = dir.join(filename);
    let content: Vec<String> = items.iter().map(Value::to_string).collect();
    fs::write(&path, content.join("\n") + "\n")?;
    Ok(path)
}

/// Serves fixed pages and fails with `SourceUnavailable` on one of them.
pub struct FlakyFetcher {
    pages: Vec<Vec<Value>>,
    fail_on_page: Option<usize>,
    requests: Arc<AtomicUsize>,
}

impl FlakyFetcher {
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages,
            fail_on_page: None,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_on(mut self, page: usize) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Request counter that stays readable after the fetcher is moved into a
    /// source.
    pub fn request_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

impl PageFetcher for FlakyFetcher {
    fn source_id(&self) -> &str {
        "flaky"
    }

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        _time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, cache_failure_report::Result<Page>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let index = token.and_then(|t| t.0.as_u64()).unwrap_or(0) as usize;

        let result = if Some(index) == self.fail_on_page {
            Err(ReportError::source_unavailable("flaky", "connection reset by peer"))
        } else {
            let items = self.pages.get(index).cloned().unwrap_or_default();
            let next = (index + 1 < self.pages.len()).then(|| ContinuationToken(json!(index + 1)));
            Ok(Page { items, next })
        };
        Box::pin(future::ready(result))
    }
}
