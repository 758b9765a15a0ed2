//! Paged retrieval: laziness, failure handling, the time window and the
//! pre-filter.

mod common;

use std::sync::atomic::Ordering;

use cache_failure_report::{
    CacheReportAnalyzer, Config, InMemoryPageFetcher, JsonlPageFetcher, RecordSource, ReportError,
    SourceFilter, SourceItem, TimeRange,
};
use common::{failed_miss, hit, ten_record_scenario, write_jsonl, FlakyFetcher, ItemBuilder};
use futures::{pin_mut, TryStreamExt};
use serde_json::Value;
use tempfile::TempDir;

fn step_ids(items: &[SourceItem]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|item| match item {
            SourceItem::Step(record) => Some(record.step_id.as_str()),
            SourceItem::Malformed(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_failed_page_aborts_without_report() {
    let fetcher = FlakyFetcher::new(vec![
        vec![hit("a", None), hit("b", None)],
        vec![failed_miss("c")],
        vec![hit("d", None)],
    ])
    .failing_on(1);
    let counter = fetcher.request_counter();

    let analyzer = CacheReportAnalyzer::from_config(fetcher, &Config::default());
    let err = analyzer.aggregate_report(None).await.unwrap_err();

    match err {
        ReportError::SourceUnavailable { source_id, reason } => {
            assert_eq!(source_id, "flaky");
            assert!(reason.contains("connection reset"));
        }
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    // No retry and no skipping ahead to the third page
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pages_are_requested_on_demand() {
    let fetcher = FlakyFetcher::new(vec![
        vec![hit("a", None), hit("b", None)],
        vec![hit("c", None)],
        vec![hit("d", None)],
    ]);
    let counter = fetcher.request_counter();
    let source = RecordSource::new(fetcher, SourceFilter::default());

    let (progress, stream) = source.fetch(None);
    pin_mut!(stream);

    let first = stream.try_next().await.unwrap().unwrap();
    assert!(matches!(first, SourceItem::Step(ref r) if r.step_id == "a"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    stream.try_next().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    stream.try_next().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(progress.pages(), 2);

    let rest: Vec<SourceItem> = stream.try_collect().await.unwrap();
    assert_eq!(step_ids(&rest), vec!["d"]);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_civil_day_boundaries() {
    let items = vec![
        ItemBuilder::new("before-start").created_at("2025-10-07T18:29:59.999000+0000").build(),
        ItemBuilder::new("at-start").created_at("2025-10-07T18:30:00.000000+0000").build(),
        ItemBuilder::new("midday").created_at("2025-10-08T06:00:00.000000+0000").build(),
        ItemBuilder::new("last-included").created_at("2025-10-08T18:29:59.998000+0000").build(),
        ItemBuilder::new("at-end").created_at("2025-10-08T18:29:59.999000+0000").build(),
        ItemBuilder::new("next-day").created_at("2025-10-08T18:30:00.000000+0000").build(),
    ];
    let source = RecordSource::new(InMemoryPageFetcher::new(items, 4), SourceFilter::default());
    let range = TimeRange::parse("2025-10-08", "2025-10-08").unwrap();

    let (progress, stream) = source.fetch(Some(&range));
    let accepted: Vec<SourceItem> = stream.try_collect().await.unwrap();

    assert_eq!(step_ids(&accepted), vec!["at-start", "midday", "last-included"]);
    assert_eq!(progress.scanned(), 6);
    assert_eq!(progress.filtered(), 3);
}

#[tokio::test]
async fn test_unparseable_timestamp_stays_in_window() {
    let items = vec![
        ItemBuilder::new("garbled").created_at("yesterday-ish").build(),
        ItemBuilder::new("outside").created_at("2025-11-01T00:00:00.000000+0000").build(),
    ];
    let source = RecordSource::new(InMemoryPageFetcher::new(items, 10), SourceFilter::default());
    let range = TimeRange::parse("2025-10-08", "2025-10-08").unwrap();

    let (_, stream) = source.fetch(Some(&range));
    let accepted: Vec<SourceItem> = stream.try_collect().await.unwrap();
    assert_eq!(step_ids(&accepted), vec!["garbled"]);
}

#[tokio::test]
async fn test_unknown_date_bucket_for_unparseable_timestamp() {
    let items = vec![ItemBuilder::new("garbled").created_at("not a date").status(1).build()];
    let analyzer = CacheReportAnalyzer::from_config(InMemoryPageFetcher::new(items, 10), &Config::default());

    let reports = analyzer.aggregate_report(None).await.unwrap();
    assert_eq!(reports.overall.date_distribution.get("unknown"), Some(&1));
    assert!(reports.overall.date_range.start.is_none());
}

#[tokio::test]
async fn test_step_kind_pre_filter() {
    let items = vec![
        ItemBuilder::new("tap").build(),
        ItemBuilder::new("text").kind("TEXT").build(),
        ItemBuilder::new("scroll").kind("SCROLL").build(),
    ];
    let source = RecordSource::new(InMemoryPageFetcher::new(items, 10), SourceFilter::default());

    let (progress, stream) = source.fetch(None);
    let accepted: Vec<SourceItem> = stream.try_collect().await.unwrap();
    assert_eq!(step_ids(&accepted), vec!["tap", "text"]);
    assert_eq!(progress.filtered(), 1);
}

#[tokio::test]
async fn test_status_set_pre_filter() {
    let items = vec![
        ItemBuilder::new("hit").status(1).build(),
        ItemBuilder::new("other-hit").status(2).build(),
        ItemBuilder::new("miss").status(-1).build(),
        ItemBuilder::new("absent").build(),
    ];
    let filter = SourceFilter {
        cache_read_statuses: Some(vec![-1, 0, 1]),
        ..SourceFilter::default()
    };
    let source = RecordSource::new(InMemoryPageFetcher::new(items, 10), filter);

    let (_, stream) = source.fetch(None);
    let accepted: Vec<SourceItem> = stream.try_collect().await.unwrap();
    assert_eq!(step_ids(&accepted), vec!["hit", "miss", "absent"]);
}

#[tokio::test]
async fn test_jsonl_backend_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut items = ten_record_scenario();
    items.push(ItemBuilder::new("scroll").kind("SCROLL").status(1).build());
    items.push(Value::String("not an item".to_string()));
    let path = write_jsonl(dir.path(), "steps.jsonl", &items).unwrap();

    let analyzer = CacheReportAnalyzer::from_config(JsonlPageFetcher::new(&path, 4), &Config::default());
    let reports = analyzer.aggregate_report(None).await.unwrap();

    assert_eq!(reports.overall.total_step_runs, 10);
    assert_eq!(reports.overall.cache_hit.percentage, "60.00%");
    assert_eq!(reports.summary.skipped_records, 1);
    assert_eq!(reports.summary.pages_fetched, 3);
    assert_eq!(reports.summary.source, path.display().to_string());
}

#[tokio::test]
async fn test_non_utf8_line_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("steps.jsonl");
    let mut content = Vec::new();
    content.extend_from_slice(hit("a", Some(0.1)).to_string().as_bytes());
    content.extend_from_slice(b"\n\xff\xfe garbage\n");
    content.extend_from_slice(failed_miss("b").to_string().as_bytes());
    content.push(b'\n');
    std::fs::write(&path, content).unwrap();

    let analyzer = CacheReportAnalyzer::from_config(JsonlPageFetcher::new(&path, 10), &Config::default());
    let reports = analyzer.aggregate_report(None).await.unwrap();

    assert_eq!(reports.overall.total_step_runs, 2);
    assert_eq!(reports.summary.skipped_records, 1);
}

#[tokio::test]
async fn test_missing_export_is_source_unavailable() {
    let dir = TempDir::new().unwrap();
    let analyzer = CacheReportAnalyzer::from_config(
        JsonlPageFetcher::new(dir.path().join("missing.jsonl"), 10),
        &Config::default(),
    );

    let err = analyzer.aggregate_report(None).await.unwrap_err();
    assert!(matches!(err, ReportError::SourceUnavailable { .. }));
}

/// Answer a single scan request with `response` and hand back the request body.
#[cfg(feature = "http")]
async fn serve_one_scan(listener: tokio::net::TcpListener, response: Value) -> Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (mut socket, _) = listener.accept().await.unwrap();
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];

    let body_start = loop {
        let read = socket.read(&mut chunk).await.unwrap();
        assert!(read > 0, "connection closed before headers were complete");
        received.extend_from_slice(&chunk[..read]);
        if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&received[..body_start]).to_lowercase();
    let length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map(|value| value.trim().parse().unwrap())
        .unwrap_or(0);
    while received.len() < body_start + length {
        let read = socket.read(&mut chunk).await.unwrap();
        received.extend_from_slice(&chunk[..read]);
    }

    let payload = response.to_string();
    let reply = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/x-amz-json-1.0\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    socket.write_all(reply.as_bytes()).await.unwrap();

    serde_json::from_slice(&received[body_start..body_start + length]).unwrap()
}

#[cfg(feature = "http")]
#[tokio::test]
async fn test_http_scan_keeps_every_timestamp_layout_in_window() {
    use std::time::Duration;

    use cache_failure_report::HttpScanFetcher;
    use serde_json::json;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let items = vec![
        ItemBuilder::new("utc-z").created_at("2025-10-08T18:29:59Z").build(),
        ItemBuilder::new("civil-offset").created_at("2025-10-08T20:00:00+05:30").build(),
        ItemBuilder::new("no-timestamp").without("created_at").build(),
        ItemBuilder::new("next-day").created_at("2025-10-09T06:00:00Z").build(),
    ];
    let server = tokio::spawn(serve_one_scan(listener, json!({ "Items": items })));

    let fetcher = HttpScanFetcher::new(
        endpoint,
        "TestSteps",
        100,
        Duration::from_secs(5),
        SourceFilter::default(),
    )
    .unwrap();
    let source = RecordSource::new(fetcher, SourceFilter::default());
    let range = TimeRange::parse("2025-10-08", "2025-10-08").unwrap();

    let (_, stream) = source.fetch(Some(&range));
    let accepted: Vec<SourceItem> = stream.try_collect().await.unwrap();
    assert_eq!(step_ids(&accepted), vec!["utc-z", "civil-offset", "no-timestamp"]);

    let request = server.await.unwrap();
    let filter = request["FilterExpression"].as_str().unwrap();
    assert!(!filter.contains("created_at"), "window leaked into {filter}");
}
