use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use super::{ContinuationToken, Page, PageFetcher};
use crate::error::{ReportError, Result};
use crate::time_range::TimeRange;

/// Reads an exported JSONL dump, one raw item per line.
///
/// The continuation token is the byte offset of the next unread line, so each
/// page reopens the file and seeks instead of holding it open across pages.
#[derive(Debug, Clone)]
pub struct JsonlPageFetcher {
    path: PathBuf,
    source_id: String,
    page_size: usize,
}

impl JsonlPageFetcher {
    pub fn new(path: impl AsRef<Path>, page_size: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            source_id: path.display().to_string(),
            path,
            page_size: page_size.max(1),
        }
    }

    async fn read_page(&self, offset: u64) -> Result<Page> {
        let unavailable = |e: std::io::Error| ReportError::source_unavailable(&self.source_id, e.to_string());

        let mut file = File::open(&self.path).await.map_err(unavailable)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(unavailable)?;
        let mut reader = BufReader::new(file);

        let mut items = Vec::with_capacity(self.page_size);
        let mut consumed = 0u64;
        let mut line = Vec::new();

        while items.len() < self.page_size {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).await.map_err(unavailable)?;
            if read == 0 {
                break;
            }
            consumed += read as u64;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            items.push(decode_line(&line));
        }

        let exhausted = reader.fill_buf().await.map_err(unavailable)?.is_empty();
        let next = (!exhausted).then(|| ContinuationToken(Value::from(offset + consumed)));

        Ok(Page { items, next })
    }
}

/// Lines that are not JSON, including non-UTF-8 bytes, are passed on as
/// strings and reported as malformed downstream.
fn decode_line(line: &[u8]) -> Value {
    serde_json::from_slice(line)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(line).trim().to_string()))
}

impl PageFetcher for JsonlPageFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn fetch_page<'a>(
        &'a self,
        token: Option<&'a ContinuationToken>,
        _time_filter: Option<&'a TimeRange>,
    ) -> BoxFuture<'a, Result<Page>> {
        Box::pin(async move {
            let offset = match token {
                None => 0,
                Some(ContinuationToken(value)) => value.as_u64().ok_or_else(|| {
                    ReportError::source_unavailable(&self.source_id, format!("invalid continuation token {value}"))
                })?,
            };
            self.read_page(offset).await
        })
    }
}
