//! Scan over HTTP against a key-value store endpoint that speaks the
//! `DynamoDB_20120810.Scan` JSON protocol (a local emulator or a signing proxy).
//!
//! Only the step-kind pre-filter is pushed down as a `FilterExpression`.
//! Stored timestamps come in several layouts and some records have none, so a
//! string comparison on `created_at` would drop in-window records; the window
//! is applied client side by the record source. Request signing is out of
//! scope.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ContinuationToken, Page, PageFetcher, SourceFilter};
use crate::error::{ReportError, Result};
use crate::time_range::TimeRange;

const SCAN_TARGET: &str = "DynamoDB_20120810.Scan";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(rename = "Items", default)]
    items: Vec<Value>,
    #[serde(rename = "LastEvaluatedKey")]
    last_evaluated_key: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpScanFetcher {
    client: reqwest::Client,
    endpoint: String,
    table_name: String,
    page_size: usize,
    filter: SourceFilter,
}

impl HttpScanFetcher {
    pub fn new(
        endpoint: impl Into<String>,
        table_name: impl Into<String>,
        page_size: usize,
        timeout: Duration,
        filter: SourceFilter,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            table_name: table_name.into(),
            page_size: page_size.max(1),
            filter,
        })
    }

    /// Body of one scan request.
    pub fn scan_request(&self, token: Option<&ContinuationToken>) -> Value {
        let mut clauses = Vec::new();
        let mut values = Map::new();

        if !self.filter.step_classifications.is_empty() {
            let placeholders: Vec<String> = self
                .filter
                .step_classifications
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    let key = format!(":kind{i}");
                    values.insert(key.clone(), json!({ "S": kind }));
                    key
                })
                .collect();
            clauses.push(format!("step_classification IN ({})", placeholders.join(", ")));
        }

        let mut request = json!({
            "TableName": self.table_name,
            "Limit": self.page_size,
        });
        if !clauses.is_empty() {
            request["FilterExpression"] = Value::String(clauses.join(" AND "));
            request["ExpressionAttributeValues"] = Value::Object(values);
        }
        if let Some(ContinuationToken(key)) = token {
            request["ExclusiveStartKey"] = key.clone();
        }
        request
    }

    async fn scan(&self, body: Value) -> Result<Page> {
        let unavailable = |reason: String| ReportError::source_unavailable(&self.endpoint, reason);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", SCAN_TARGET)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("scan returned {status}: {detail}")));
        }

        let scan: ScanResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid scan response: {e}")))?;

        debug!(items = scan.items.len(), more = scan.last_evaluated_key.is_some(), "Fetched scan page");

        Ok(Page {
            items: scan.items,
            next: scan.last_evaluated_key.map(ContinuationToken),
        })
    }
}

impl PageFetcher for HttpScanFetcher {
    fn source_id(&self) -> &str {
        &self.endpoint
    }

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        _time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, Result<Page>> {
        let body = self.scan_request(token);
        Box::pin(self.scan(body))
    }
}
