use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use streaming_catalog::batch::BatchAccumulator;
use streaming_catalog::config::{Config, CrawlConfig, ErrorHandlingStrategy};
use streaming_catalog::error::{CatalogError, Result};
use streaming_catalog::pipeline::{run_catalog, DriverState, PaginationDriver, StopReason};
use streaming_catalog::storage::{InMemorySink, PersistenceSink, TableTarget};
use streaming_catalog::types::{Category, Cursor, ItemRef, NormalizedRecord, PageSource, RawRecord, StreamKey};

/// Scripted paged source: `pages[n]` is served for page `n + 1`, empty afterwards
#[derive(Default)]
struct ScriptedSource {
    pages: Vec<Vec<ItemRef>>,
    /// Page numbers that always fail
    failing_pages: Vec<u32>,
    /// Remaining failures per item path; `u32::MAX` never succeeds
    item_failures: Mutex<HashMap<String, u32>>,
    page_calls: Mutex<Vec<Cursor>>,
    detail_calls: Mutex<Vec<String>>,
    /// Serve one-item pages forever instead of `pages`
    endless: bool,
    /// Cancel this token (and fail) when the given item is requested
    cancel_at: Option<(String, CancellationToken)>,
}

impl ScriptedSource {
    fn with_pages(pages: Vec<Vec<ItemRef>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    async fn fail_item(self, path: &str, times: u32) -> Self {
        self.item_failures.lock().await.insert(path.to_string(), times);
        self
    }
}

fn item(path: &str) -> ItemRef {
    ItemRef {
        id: path.trim_start_matches('/').to_string(),
        path: path.to_string(),
    }
}

fn page(paths: &[&str]) -> Vec<ItemRef> {
    paths.iter().map(|p| item(p)).collect()
}

fn raw(value: Value) -> RawRecord {
    match value {
        Value::Object(map) => RawRecord::from(map),
        other => panic!("fixture must be an object, got {other}"),
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_page(&self, _stream: &StreamKey, cursor: Cursor) -> Result<Vec<ItemRef>> {
        self.page_calls.lock().await.push(cursor);
        if self.failing_pages.contains(&cursor.page) {
            return Err(CatalogError::Source {
                message: format!("page {} unavailable", cursor.page),
            });
        }
        if self.endless {
            return Ok(vec![item(&format!("/title/{}", cursor.page))]);
        }
        Ok(self
            .pages
            .get(cursor.page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_detail(&self, stream: &StreamKey, item: &ItemRef) -> Result<RawRecord> {
        self.detail_calls.lock().await.push(item.path.clone());

        if let Some((path, token)) = &self.cancel_at {
            if *path == item.path {
                token.cancel();
                return Err(CatalogError::Source {
                    message: "interrupted".to_string(),
                });
            }
        }

        let mut failures = self.item_failures.lock().await;
        if let Some(remaining) = failures.get_mut(&item.path) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(CatalogError::Source {
                    message: format!("detail for {} timed out", item.path),
                });
            }
        }

        Ok(raw(json!({
            "provedor": stream.provider,
            "categoria": stream.category.as_str(),
            "titulo": format!("Title {}", item.id),
            "ano": 2020,
            "duracao_minutos": 125,
            "imdb_score": 7.2,
            "imdb_count": 15000,
            "url": format!("https://www.justwatch.com{}", item.path),
        })))
    }
}

/// Sink that fails every write
struct BrokenSink;

#[async_trait]
impl PersistenceSink for BrokenSink {
    async fn write(&self, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        Err(CatalogError::Persistence {
            table: target.to_string(),
            batch_size: batch.len(),
            message: "database is locked".to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn crawl_config() -> CrawlConfig {
    CrawlConfig {
        page_size: 2,
        retry_delay_ms: 0,
        max_item_retries: 3,
        max_page_retries: 2,
        ..CrawlConfig::default()
    }
}

fn target() -> TableTarget {
    TableTarget::new("main", "justwatch_tb").unwrap()
}

fn driver(source: Arc<ScriptedSource>, config: CrawlConfig) -> PaginationDriver {
    PaginationDriver::new(source, Arc::new(config), StreamKey::new("nfx", Category::Filmes))
}

#[tokio::test]
async fn test_empty_first_page_goes_straight_to_done() {
    let source = Arc::new(ScriptedSource::with_pages(vec![]));
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();
    let mut driver = driver(source.clone(), crawl_config());

    let report = driver.run(&mut acc).await;

    assert_eq!(driver.state(), DriverState::Done);
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.drains, 1);
    assert_eq!(report.records_normalized, 0);
    assert_eq!(report.flushes, 0);
    assert!(sink.rows(&target()).is_empty());
    assert!(source.detail_calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_pages_are_requested_in_offset_order() {
    let source = Arc::new(ScriptedSource::with_pages(vec![
        page(&["/a", "/b"]),
        page(&["/c", "/d"]),
        page(&["/e"]),
    ]));
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();

    let report = driver(source.clone(), crawl_config()).run(&mut acc).await;

    let offsets: Vec<u64> = source.page_calls.lock().await.iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 2, 4, 6]);
    assert_eq!(report.pages_fetched, 4);
    assert_eq!(report.records_persisted, 5);

    let titles: Vec<String> = sink
        .rows(&target())
        .into_iter()
        .filter_map(|r| r.titulo)
        .collect();
    assert_eq!(titles, vec!["Title a", "Title b", "Title c", "Title d", "Title e"]);
}

#[tokio::test]
async fn test_flaky_item_is_retried_and_broken_item_dropped() {
    let source = ScriptedSource::with_pages(vec![page(&["/flaky", "/broken", "/fine"]), page(&["/next"])])
        .fail_item("/flaky", 2)
        .await
        .fail_item("/broken", u32::MAX)
        .await;
    let source = Arc::new(source);
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();

    let report = driver(source.clone(), crawl_config()).run(&mut acc).await;

    let calls = source.detail_calls.lock().await.clone();
    assert_eq!(calls.iter().filter(|p| *p == "/flaky").count(), 3);
    assert_eq!(calls.iter().filter(|p| *p == "/broken").count(), 4);
    assert_eq!(report.items_dropped, 1);
    assert_eq!(report.items_seen, 4);
    assert_eq!(report.records_persisted, 3);
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_records_of_a_page_share_one_timestamp() {
    let source = Arc::new(ScriptedSource::with_pages(vec![page(&["/a", "/b"]), page(&["/c"])]));
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();

    driver(source, crawl_config()).run(&mut acc).await;

    let rows = sink.rows(&target());
    assert_eq!(rows[0].extract_timestamp, rows[1].extract_timestamp);
    assert!(rows[2].extract_timestamp >= rows[1].extract_timestamp);
    assert_eq!(rows[0].duracao.as_deref(), Some("2h 5min"));
    assert_eq!(rows[0].imdb_count, Some(15_000));
}

#[tokio::test]
async fn test_page_cap_stops_endless_source() {
    let source = Arc::new(ScriptedSource {
        endless: true,
        ..Default::default()
    });
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();
    let config = CrawlConfig {
        max_pages: 3,
        ..crawl_config()
    };

    let report = driver(source, config).run(&mut acc).await;

    assert_eq!(report.stop_reason, StopReason::PageCap);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(sink.rows(&target()).len(), 3);
}

#[tokio::test]
async fn test_failed_page_stops_stream_after_draining() {
    let source = Arc::new(ScriptedSource {
        pages: vec![page(&["/a"]), page(&["/b"])],
        failing_pages: vec![2],
        ..Default::default()
    });
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();

    let report = driver(source.clone(), crawl_config()).run(&mut acc).await;

    assert_eq!(report.stop_reason, StopReason::SourceFailed);
    assert!(!report.succeeded());
    // one success plus 1 + max_page_retries attempts at page 2
    assert_eq!(source.page_calls.lock().await.len(), 4);
    assert_eq!(sink.rows(&target()).len(), 1);
}

#[tokio::test]
async fn test_cancel_mid_page_drains_buffered_records() {
    let cancel = CancellationToken::new();
    let source = Arc::new(ScriptedSource {
        pages: vec![page(&["/a", "/b"]), page(&["/c", "/d"]), page(&["/e"])],
        cancel_at: Some(("/d".to_string(), cancel.clone())),
        ..Default::default()
    });
    let sink = Arc::new(InMemorySink::new());
    let mut acc = BatchAccumulator::new(sink.clone(), target(), 100).unwrap();
    let mut driver = driver(source.clone(), crawl_config()).with_cancellation(cancel);

    let report = driver.run(&mut acc).await;

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(driver.state(), DriverState::Done);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.drains, 1);
    assert_eq!(report.records_persisted, 3);
    assert_eq!(report.unpersisted_records, 0);

    let titles: Vec<String> = sink
        .rows(&target())
        .into_iter()
        .filter_map(|r| r.titulo)
        .collect();
    assert_eq!(titles, vec!["Title a", "Title b", "Title c"]);
    assert_eq!(source.page_calls.lock().await.len(), 2);
}

#[tokio::test]
async fn test_stop_on_first_persistence_error() {
    let source = Arc::new(ScriptedSource::with_pages(vec![page(&["/a", "/b"]), page(&["/c", "/d"])]));
    let sink: Arc<dyn PersistenceSink> = Arc::new(BrokenSink);
    let mut acc = BatchAccumulator::new(sink, target(), 2).unwrap();
    let config = CrawlConfig {
        on_persistence_error: ErrorHandlingStrategy::StopOnFirstError,
        ..crawl_config()
    };

    let report = driver(source.clone(), config).run(&mut acc).await;

    assert_eq!(report.stop_reason, StopReason::PersistenceFailed);
    assert_eq!(report.unpersisted_records, 2);
    assert_eq!(source.page_calls.lock().await.len(), 1);
    assert!(report.errors.iter().any(|e| e.contains("database is locked")));
}

#[tokio::test]
async fn test_continue_on_persistence_error_keeps_crawling() {
    let source = Arc::new(ScriptedSource::with_pages(vec![page(&["/a", "/b"]), page(&["/c"])]));
    let sink: Arc<dyn PersistenceSink> = Arc::new(BrokenSink);
    let mut acc = BatchAccumulator::new(sink, target(), 2).unwrap();

    let report = driver(source, crawl_config()).run(&mut acc).await;

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.records_normalized, 3);
    assert_eq!(report.unpersisted_records, 3);
    assert!(!report.succeeded());
}

#[tokio::test]
async fn test_run_catalog_writes_every_stream_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");

    let mut config = Config::default();
    config.database.url = format!("sqlite://{}", db_path.display());
    config.database.batch_size = 3;
    config.crawl = CrawlConfig {
        providers: vec!["nfx".to_string(), "dnp".to_string()],
        categories: vec![Category::Filmes, Category::Series],
        ..crawl_config()
    };
    config.validate().unwrap();

    let source = Arc::new(ScriptedSource::with_pages(vec![
        page(&["/a", "/b"]),
        page(&["/c", "/d"]),
        page(&["/e"]),
    ]));
    let sink = streaming_catalog::storage::open_sink(&config.database).await.unwrap();

    let summary = run_catalog(Arc::new(config), source, sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.streams.len(), 4);
    assert_eq!(summary.records_persisted(), 20);
    assert!(summary.streams.iter().all(|s| s.drains == 1));

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let per_provider: Vec<(String, i64)> = conn
        .prepare("SELECT provedor, COUNT(*) FROM justwatch_tb GROUP BY provedor ORDER BY provedor")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap();
    assert_eq!(per_provider, vec![("dnp".to_string(), 10), ("nfx".to_string(), 10)]);
}

#[tokio::test]
async fn test_cancelled_run_still_closes_sink() {
    let mut config = Config::default();
    config.crawl = CrawlConfig {
        providers: vec!["nfx".to_string()],
        categories: vec![Category::Series],
        ..crawl_config()
    };

    let source = Arc::new(ScriptedSource {
        endless: true,
        ..Default::default()
    });
    let sink = Arc::new(InMemorySink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = run_catalog(Arc::new(config), source, sink.clone(), cancel).await.unwrap();

    assert_eq!(summary.streams[0].stop_reason, StopReason::Cancelled);
    assert!(sink.is_closed());
}
