use crate::batch::BatchAccumulator;
use crate::config::{Config, CrawlConfig, ErrorHandlingStrategy};
use crate::error::{CatalogError, Result};
use crate::normalize::{RecordNormalizer, RecordShape};
use crate::storage::{PersistenceSink, TableTarget};
use crate::types::{Cursor, ItemRef, PageSource, RawRecord, StreamKey};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Pagination state of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    Fetching,
    ItemRetry,
    Exhausted,
    Done,
}

/// Why a stream stopped requesting pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source returned an empty page
    Exhausted,
    /// `max_pages` reached before the source ran dry
    PageCap,
    Cancelled,
    /// A page could not be fetched within `max_page_retries`
    SourceFailed,
    /// A batch failed under `StopOnFirstError`
    PersistenceFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Exhausted => "exhausted",
            StopReason::PageCap => "page_cap",
            StopReason::Cancelled => "cancelled",
            StopReason::SourceFailed => "source_failed",
            StopReason::PersistenceFailed => "persistence_failed",
        }
    }
}

/// Outcome of one stream (or one import)
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub stream: String,
    pub pages_fetched: u32,
    pub items_seen: usize,
    pub records_normalized: usize,
    pub items_dropped: usize,
    pub degraded_fields: usize,
    pub records_persisted: usize,
    pub flushes: usize,
    pub drains: usize,
    /// Records still buffered after the final drain
    pub unpersisted_records: usize,
    pub stop_reason: StopReason,
    pub errors: Vec<String>,
}

impl StreamReport {
    fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            pages_fetched: 0,
            items_seen: 0,
            records_normalized: 0,
            items_dropped: 0,
            degraded_fields: 0,
            records_persisted: 0,
            flushes: 0,
            drains: 0,
            unpersisted_records: 0,
            stop_reason: StopReason::Exhausted,
            errors: Vec::new(),
        }
    }

    /// Stream ended without losing data to a source or persistence failure
    pub fn succeeded(&self) -> bool {
        self.unpersisted_records == 0
            && !matches!(
                self.stop_reason,
                StopReason::SourceFailed | StopReason::PersistenceFailed
            )
    }
}

enum ItemOutcome {
    Fetched(RawRecord),
    Dropped,
    Cancelled,
}

enum PageOutcome {
    Continue,
    Cancelled,
    PersistenceFailed,
}

/// Walks one provider x category stream page by page.
///
/// Pages are requested strictly in order, one at a time. Every page's records
/// share one capture timestamp. The accumulator is always drained before the
/// driver reaches `Done`, whatever stopped the stream.
pub struct PaginationDriver {
    source: Arc<dyn PageSource>,
    config: Arc<CrawlConfig>,
    stream: StreamKey,
    normalizer: RecordNormalizer,
    cancel: CancellationToken,
    state: DriverState,
    last_capture: Option<NaiveDateTime>,
}

impl PaginationDriver {
    pub fn new(source: Arc<dyn PageSource>, config: Arc<CrawlConfig>, stream: StreamKey) -> Self {
        Self {
            source,
            config,
            stream,
            normalizer: RecordNormalizer::new(),
            cancel: CancellationToken::new(),
            state: DriverState::Fetching,
            last_capture: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    #[instrument(skip(self, accumulator), fields(stream = %self.stream, source = self.source.source_name()))]
    pub async fn run(&mut self, accumulator: &mut BatchAccumulator) -> StreamReport {
        let mut report = StreamReport::new(self.stream.to_string());
        let mut cursor = Cursor::start();
        self.state = DriverState::Fetching;
        info!("🚀 Starting stream {}", self.stream);

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if cursor.page > self.config.max_pages {
                warn!("Stream {} hit the page cap of {}", self.stream, self.config.max_pages);
                break StopReason::PageCap;
            }

            let items = match self.fetch_page(cursor).await {
                Ok(Some(items)) => items,
                Ok(None) => break StopReason::Cancelled,
                Err(e) => {
                    report.errors.push(format!("page {}: {}", cursor.page, e));
                    break StopReason::SourceFailed;
                }
            };
            report.pages_fetched += 1;

            if items.is_empty() {
                self.state = DriverState::Exhausted;
                info!("Stream {} exhausted after {} pages", self.stream, cursor.page - 1);
                break StopReason::Exhausted;
            }

            debug!("Page {} of {} has {} items", cursor.page, self.stream, items.len());
            match self.process_page(&items, accumulator, &mut report).await {
                PageOutcome::Continue => {}
                PageOutcome::Cancelled => break StopReason::Cancelled,
                PageOutcome::PersistenceFailed => break StopReason::PersistenceFailed,
            }

            cursor = cursor.next(self.config.page_size);
        };

        if let Err(e) = accumulator.drain().await {
            error!(
                table = %accumulator.target(),
                batch_size = accumulator.len(),
                "Final drain for {} failed: {}",
                self.stream,
                e
            );
            report.errors.push(format!("drain: {}", e));
        }

        let stats = accumulator.stats();
        report.records_persisted = stats.records_persisted;
        report.flushes = stats.flushes;
        report.drains = stats.drains;
        report.unpersisted_records = accumulator.len();
        report.stop_reason = stop_reason;
        self.state = DriverState::Done;

        crate::metrics::run::stream_completed(stop_reason.as_str());
        info!(
            "✅ Stream {} done ({}): {} records normalized, {} persisted, {} items dropped",
            self.stream,
            stop_reason.as_str(),
            report.records_normalized,
            report.records_persisted,
            report.items_dropped
        );
        report
    }

    async fn process_page(
        &mut self,
        items: &[ItemRef],
        accumulator: &mut BatchAccumulator,
        report: &mut StreamReport,
    ) -> PageOutcome {
        let mut raws = Vec::with_capacity(items.len());
        let mut cancelled = false;

        for item in items {
            report.items_seen += 1;
            match self.fetch_item(item).await {
                ItemOutcome::Fetched(raw) => raws.push(raw),
                ItemOutcome::Dropped => report.items_dropped += 1,
                ItemOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        let captured_at = self.capture_instant();
        for raw in &raws {
            let shape = self.source.record_shape(raw);
            let outcome = self.normalizer.normalize_detailed(raw, shape, captured_at);
            for field in &outcome.degraded_fields {
                crate::metrics::normalize::field_degraded(field);
            }
            report.degraded_fields += outcome.degraded_fields.len();
            report.records_normalized += 1;

            if let Err(e) = accumulator.append(outcome.record).await {
                report.errors.push(e.to_string());
                if self.config.on_persistence_error == ErrorHandlingStrategy::StopOnFirstError {
                    error!("Stopping stream {} after persistence failure", self.stream);
                    return PageOutcome::PersistenceFailed;
                }
            }
        }
        crate::metrics::normalize::records_normalized(raws.len());

        if cancelled {
            PageOutcome::Cancelled
        } else {
            PageOutcome::Continue
        }
    }

    /// `Ok(None)` when cancelled while waiting on the source.
    async fn fetch_page(&self, cursor: Cursor) -> Result<Option<Vec<ItemRef>>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.source.fetch_page(&self.stream, cursor) => result,
            };

            match result {
                Ok(items) => {
                    crate::metrics::source::page_fetched(&self.stream.provider, items.len());
                    return Ok(Some(items));
                }
                Err(e) => {
                    crate::metrics::source::page_error(&self.stream.provider);
                    if attempt > self.config.max_page_retries {
                        error!(
                            "Page {} of {} failed after {} attempts: {}",
                            cursor.page, self.stream, attempt, e
                        );
                        return Err(e);
                    }
                    warn!(
                        "Page {} of {} failed (attempt {}), retrying: {}",
                        cursor.page, self.stream, attempt, e
                    );
                    if !self.pause().await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn fetch_item(&mut self, item: &ItemRef) -> ItemOutcome {
        let max_attempts = self.config.max_item_retries + 1;
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break ItemOutcome::Cancelled,
                result = self.source.fetch_detail(&self.stream, item) => result,
            };

            match result {
                Ok(raw) => break ItemOutcome::Fetched(raw),
                Err(e) => {
                    crate::metrics::source::item_error(&self.stream.provider);
                    if attempt >= max_attempts {
                        crate::metrics::source::item_dropped(&self.stream.provider);
                        error!(
                            provider = %self.stream.provider,
                            category = %self.stream.category,
                            path = %item.path,
                            attempts = attempt,
                            "Dropping item after exhausting retries: {}",
                            e
                        );
                        break ItemOutcome::Dropped;
                    }
                    self.state = DriverState::ItemRetry;
                    warn!("Item {} failed (attempt {}/{}): {}", item.path, attempt, max_attempts, e);
                    if !self.pause().await {
                        break ItemOutcome::Cancelled;
                    }
                }
            }
        };

        self.state = DriverState::Fetching;
        outcome
    }

    /// Retry delay; `false` when cancelled while waiting.
    async fn pause(&self) -> bool {
        let delay = self.config.retry_delay();
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Whole-second UTC instant, never earlier than the previous page's.
    fn capture_instant(&mut self) -> NaiveDateTime {
        let now = truncate_to_second(Utc::now().naive_utc());
        let stamp = match self.last_capture {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_capture = Some(stamp);
        stamp
    }
}

fn truncate_to_second(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}

/// Result of a full crawl run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub streams: Vec<StreamReport>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn records_persisted(&self) -> usize {
        self.streams.iter().map(|s| s.records_persisted).sum()
    }

    pub fn records_normalized(&self) -> usize {
        self.streams.iter().map(|s| s.records_normalized).sum()
    }

    pub fn items_dropped(&self) -> usize {
        self.streams.iter().map(|s| s.items_dropped).sum()
    }

    pub fn failed_streams(&self) -> Vec<&StreamReport> {
        self.streams.iter().filter(|s| !s.succeeded()).collect()
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.streams.iter().all(StreamReport::succeeded)
    }
}

/// Crawl every configured provider x category stream into `sink`.
///
/// Streams run concurrently up to `max_concurrent_streams`, sharing the sink.
/// The sink is closed once every stream has drained, on every path.
pub async fn run_catalog(
    config: Arc<Config>,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn PersistenceSink>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let target = match TableTarget::from_config(&config.database) {
        Ok(target) => target,
        Err(e) => {
            close_sink(&sink).await;
            return Err(e);
        }
    };
    let crawl = Arc::new(config.crawl.clone());
    let batch_size = config.database.batch_size;
    let semaphore = Arc::new(Semaphore::new(crawl.max_concurrent_streams));

    info!(
        %run_id,
        "🚀 Starting catalog run: {} providers x {} categories into {}",
        crawl.providers.len(),
        crawl.categories.len(),
        target
    );

    let mut tasks = JoinSet::new();
    for provider in &crawl.providers {
        for category in &crawl.categories {
            let key = StreamKey::new(provider.clone(), *category);
            let span = info_span!("stream", %run_id, stream = %key);
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            let crawl = Arc::clone(&crawl);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let target = target.clone();

            tasks.spawn(
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| CatalogError::Source { message: e.to_string() })?;
                    let mut accumulator = BatchAccumulator::new(sink, target, batch_size)?;
                    let mut driver = PaginationDriver::new(source, crawl, key).with_cancellation(cancel);
                    Ok::<_, CatalogError>(driver.run(&mut accumulator).await)
                }
                .instrument(span),
            );
        }
    }

    let mut streams = Vec::new();
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(report)) => streams.push(report),
            Ok(Err(e)) => {
                error!(%run_id, "Stream could not start: {}", e);
                errors.push(e.to_string());
            }
            Err(e) => {
                error!(%run_id, "Stream task failed: {}", e);
                errors.push(format!("stream task failed: {e}"));
            }
        }
    }
    streams.sort_by(|a, b| a.stream.cmp(&b.stream));

    close_sink(&sink).await;

    let summary = RunSummary {
        run_id,
        target: target.to_string(),
        started_at,
        finished_at: Utc::now(),
        streams,
        errors,
    };

    for failed in summary.failed_streams() {
        warn!(
            %run_id,
            "Stream {} ended with {} ({} unpersisted records)",
            failed.stream,
            failed.stop_reason.as_str(),
            failed.unpersisted_records
        );
    }
    info!(
        %run_id,
        "🎉 Run finished: {} records persisted, {} items dropped",
        summary.records_persisted(),
        summary.items_dropped()
    );
    Ok(summary)
}

async fn close_sink(sink: &Arc<dyn PersistenceSink>) {
    if let Err(e) = sink.close().await {
        error!("Failed to close persistence sink: {}", e);
    }
}

/// Normalize a JSON-lines dump of raw records and persist it.
///
/// Unreadable lines are logged and counted as dropped. Every record of the
/// import shares one capture timestamp. The sink is left open for the caller.
pub async fn import_records<R: BufRead>(
    reader: R,
    accumulator: &mut BatchAccumulator,
    strategy: ErrorHandlingStrategy,
) -> Result<StreamReport> {
    let normalizer = RecordNormalizer::new();
    let captured_at = truncate_to_second(Utc::now().naive_utc());
    let mut report = StreamReport::new("import");

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        report.items_seen += 1;

        let raw: RawRecord = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping line {}: not a JSON object ({})", index + 1, e);
                report.items_dropped += 1;
                continue;
            }
        };

        let outcome = normalizer.normalize_detailed(&raw, RecordShape::detect(&raw), captured_at);
        report.degraded_fields += outcome.degraded_fields.len();
        report.records_normalized += 1;

        if let Err(e) = accumulator.append(outcome.record).await {
            report.errors.push(e.to_string());
            if strategy == ErrorHandlingStrategy::StopOnFirstError {
                report.stop_reason = StopReason::PersistenceFailed;
                break;
            }
        }
    }
    crate::metrics::normalize::records_normalized(report.records_normalized);

    if let Err(e) = accumulator.drain().await {
        report.errors.push(format!("drain: {}", e));
    }

    let stats = accumulator.stats();
    report.records_persisted = stats.records_persisted;
    report.flushes = stats.flushes;
    report.drains = stats.drains;
    report.unpersisted_records = accumulator.len();
    info!(
        "📥 Imported {} records ({} persisted, {} lines skipped)",
        report.records_normalized, report.records_persisted, report.items_dropped
    );
    Ok(report)
}

/// Import a JSON-lines dump into `target`, closing the sink whether or not
/// the import succeeds.
pub async fn import_into_sink<R: BufRead>(
    reader: R,
    sink: Arc<dyn PersistenceSink>,
    target: TableTarget,
    batch_size: usize,
    strategy: ErrorHandlingStrategy,
) -> Result<StreamReport> {
    let mut accumulator = match BatchAccumulator::new(Arc::clone(&sink), target, batch_size) {
        Ok(accumulator) => accumulator,
        Err(e) => {
            close_sink(&sink).await;
            return Err(e);
        }
    };

    let result = import_records(reader, &mut accumulator, strategy).await;
    drop(accumulator);
    close_sink(&sink).await;
    result
}
