use futures::future::{self, BoxFuture};
use serde_json::Value;

use super::{ContinuationToken, Page, PageFetcher};
use crate::error::{ReportError, Result};
use crate::time_range::TimeRange;

/// Serves a fixed set of raw items in pages of `page_size`. The continuation
/// token is the index of the next item.
#[derive(Debug, Clone)]
pub struct InMemoryPageFetcher {
    items: Vec<Value>,
    page_size: usize,
}

impl InMemoryPageFetcher {
    pub fn new(items: Vec<Value>, page_size: usize) -> Self {
        Self {
            items,
            page_size: page_size.max(1),
        }
    }
}

impl PageFetcher for InMemoryPageFetcher {
    fn source_id(&self) -> &str {
        "memory"
    }

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        _time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, Result<Page>> {
        let start = match token {
            None => 0,
            Some(ContinuationToken(value)) => match value.as_u64() {
                Some(index) => index as usize,
                None => {
                    return Box::pin(future::ready(Err(ReportError::source_unavailable(
                        self.source_id(),
                        format!("invalid continuation token {value}"),
                    ))))
                }
            },
        };

        let end = (start + self.page_size).min(self.items.len());
        let items = self.items.get(start..end).unwrap_or_default().to_vec();
        let next = (end < self.items.len()).then(|| ContinuationToken(Value::from(end as u64)));

        Box::pin(future::ready(Ok(Page { items, next })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let fetcher = InMemoryPageFetcher::new((0..5).map(|i| json!({"step_id": i})).collect(), 2);

        let first = fetcher.fetch_page(None, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next.unwrap();

        let second = fetcher.fetch_page(Some(&token), None).await.unwrap();
        let third = fetcher
            .fetch_page(second.next.as_ref(), None)
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next.is_none());
    }

    #[tokio::test]
    async fn test_empty_store_is_one_empty_page() {
        let fetcher = InMemoryPageFetcher::new(Vec::new(), 10);
        let page = fetcher.fetch_page(None, None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }
}
