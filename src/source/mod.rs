//! Record Source Adapter
//!
//! Retrieves raw step items page by page through a [`PageFetcher`], decodes them
//! into [`StepRecord`]s and applies the fixed pre-filter before yielding.
//!
//! Ownership model:
//! - `PageFetcher` is the collaborator seam: one call returns one page plus an
//!   optional continuation token. `None` is the end-of-data signal.
//! - `RecordSource` owns the paging loop. It holds at most one decoded page in
//!   memory and requests the next page only after the previous one has been
//!   fully consumed by the caller.
//! - A failed page aborts the scan with `SourceUnavailable`. Pages are never
//!   skipped and the adapter performs no retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{MalformedRecord, ReportError, Result};
use crate::models::StepRecord;
use crate::time_range::TimeRange;
use crate::timestamp_parser::TimestampParser;

pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod item;
pub mod memory;

pub use file::JsonlPageFetcher;
#[cfg(feature = "http")]
pub use http::HttpScanFetcher;
pub use memory::InMemoryPageFetcher;

/// Opaque position handed back by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationToken(pub Value);

/// One page of raw items.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// `None` signals end of data.
    pub next: Option<ContinuationToken>,
}

/// Page-at-a-time access to a backing store.
///
/// Implementations may push the time filter down to the store; the adapter
/// re-checks it client side regardless.
pub trait PageFetcher: Send + Sync {
    /// Stable identifier used in logs and `SourceUnavailable` errors.
    fn source_id(&self) -> &str;

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, Result<Page>>;
}

impl<T: PageFetcher + ?Sized> PageFetcher for Box<T> {
    fn source_id(&self) -> &str {
        (**self).source_id()
    }

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, Result<Page>> {
        (**self).fetch_page(token, time_filter)
    }
}

/// Fixed pre-filter applied before records are yielded. It is configuration,
/// not a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFilter {
    /// Step kinds admitted (`TAP`, `TEXT` by default).
    pub step_classifications: Vec<String>,
    /// Read statuses admitted when present. `None` admits every status. An
    /// absent status is always admitted.
    pub cache_read_statuses: Option<Vec<i64>>,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            step_classifications: vec!["TAP".to_string(), "TEXT".to_string()],
            cache_read_statuses: None,
        }
    }
}

impl SourceFilter {
    pub fn admits(&self, record: &StepRecord) -> bool {
        let kind_ok = record.step_classification.as_ref().is_some_and(|kind| {
            self.step_classifications
                .iter()
                .any(|allowed| allowed == kind.as_str())
        });
        if !kind_ok {
            return false;
        }

        match (&self.cache_read_statuses, record.cache_read_status) {
            (Some(allowed), Some(status)) => allowed.contains(&status),
            _ => true,
        }
    }
}

/// What the adapter yields: a decoded record, or a skip event for an item that
/// could not be decoded at all.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Step(StepRecord),
    Malformed(MalformedRecord),
}

/// Running counters for one scan, readable while the stream is consumed.
#[derive(Debug, Default)]
pub struct ScanProgress {
    pages: AtomicU64,
    scanned: AtomicU64,
    yielded: AtomicU64,
    filtered: AtomicU64,
}

impl ScanProgress {
    pub fn pages(&self) -> u64 {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }

    pub fn yielded(&self) -> u64 {
        self.yielded.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}

pub struct RecordSource<F> {
    fetcher: F,
    filter: SourceFilter,
    progress_every_pages: u64,
}

struct ScanState<'a, F> {
    source: &'a RecordSource<F>,
    range: Option<&'a TimeRange>,
    token: Option<ContinuationToken>,
    finished: bool,
    progress: Arc<ScanProgress>,
}

impl<F: PageFetcher> RecordSource<F> {
    pub fn new(fetcher: F, filter: SourceFilter) -> Self {
        Self {
            fetcher,
            filter,
            progress_every_pages: 5,
        }
    }

    pub fn with_progress_interval(mut self, pages: u64) -> Self {
        self.progress_every_pages = pages.max(1);
        self
    }

    pub fn source_id(&self) -> &str {
        self.fetcher.source_id()
    }

    pub fn filter(&self) -> &SourceFilter {
        &self.filter
    }

    /// Lazily scan the store. With no range the whole collection is scanned.
    ///
    /// The returned [`ScanProgress`] is updated as pages are consumed.
    pub fn fetch<'a>(
        &'a self,
        range: Option<&'a TimeRange>,
    ) -> (Arc<ScanProgress>, impl Stream<Item = Result<SourceItem>> + 'a) {
        let progress = Arc::new(ScanProgress::default());

        match range {
            Some(range) => info!(
                source = %self.source_id(),
                start = %range.start,
                end = %range.end,
                "Starting filtered scan"
            ),
            None => info!(source = %self.source_id(), "Starting full scan (no time filter)"),
        }

        let state = ScanState {
            source: self,
            range,
            token: None,
            finished: false,
            progress: Arc::clone(&progress),
        };

        let pages = stream::try_unfold(state, ScanState::next_page);

        let records = pages
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, ReportError>)))
            .try_flatten();

        (progress, records)
    }

    /// Decode one page and drop items outside the pre-filter or the window.
    fn accept_page(
        &self,
        raw_items: Vec<Value>,
        range: Option<&TimeRange>,
        progress: &ScanProgress,
    ) -> Vec<SourceItem> {
        progress
            .scanned
            .fetch_add(raw_items.len() as u64, Ordering::Relaxed);

        let mut accepted = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            let record = match item::decode_item(&raw) {
                Ok(record) => record,
                Err(malformed) => {
                    warn!(
                        step_id = ?malformed.step_id,
                        reason = %malformed.reason,
                        "Skipping malformed record"
                    );
                    progress.yielded.fetch_add(1, Ordering::Relaxed);
                    accepted.push(SourceItem::Malformed(malformed));
                    continue;
                }
            };

            if !self.filter.admits(&record) || !within_range(&record, range) {
                progress.filtered.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            progress.yielded.fetch_add(1, Ordering::Relaxed);
            accepted.push(SourceItem::Step(record));
        }

        debug!(accepted = accepted.len(), "Decoded page");
        accepted
    }
}

impl<'a, F: PageFetcher> ScanState<'a, F> {
    /// Fetch, decode and filter one page. `Ok(None)` once the end-of-data
    /// signal has been seen.
    async fn next_page(mut self) -> Result<Option<(Vec<SourceItem>, Self)>> {
        if self.finished {
            return Ok(None);
        }

        let source = self.source;
        let page = match source.fetcher.fetch_page(self.token.as_ref(), self.range).await {
            Ok(page) => page,
            Err(e) => {
                error!(
                    source = %source.source_id(),
                    page = self.progress.pages() + 1,
                    error = %e,
                    "Scan aborted"
                );
                return Err(e);
            }
        };

        let items = source.accept_page(page.items, self.range, &self.progress);
        self.token = page.next;
        self.finished = self.token.is_none();

        let pages = self.progress.pages.fetch_add(1, Ordering::Relaxed) + 1;
        if pages % source.progress_every_pages == 0 {
            info!(
                pages,
                scanned = self.progress.scanned(),
                yielded = self.progress.yielded(),
                "Scan progress"
            );
        }
        if self.finished {
            info!(
                pages,
                total_items = self.progress.yielded(),
                filtered = self.progress.filtered(),
                "Scan complete"
            );
        }

        Ok(Some((items, self)))
    }
}

/// Records whose timestamp is missing or unparseable stay in the scan.
fn within_range(record: &StepRecord, range: Option<&TimeRange>) -> bool {
    let Some(range) = range else {
        return true;
    };
    match record.created_at.as_deref().map(TimestampParser::parse) {
        Some(Ok(instant)) => range.contains(instant),
        _ => true,
    }
}
