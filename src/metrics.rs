//! Prometheus metrics for catalog runs
//!
//! Metrics are recorded through the `metrics` facade. When no recorder is
//! installed (tests, library use) every call is a no-op. A crawl run can push
//! the rendered registry to a Pushgateway once it finishes.

use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Every metric name emitted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source metrics
    SourcePagesFetched,
    SourcePageErrors,
    SourceItemErrors,
    SourceItemsDropped,

    // Normalize metrics
    NormalizeRecords,
    NormalizeDegradedFields,

    // Batch metrics
    BatchFlushes,
    BatchFlushFailures,
    BatchSize,

    // Sink metrics
    SinkRowsWritten,
    SinkWriteFailures,
    SinkWriteDuration,

    // Run metrics
    StreamsCompleted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourcePagesFetched => "catalog_source_pages_fetched_total",
            MetricName::SourcePageErrors => "catalog_source_page_errors_total",
            MetricName::SourceItemErrors => "catalog_source_item_errors_total",
            MetricName::SourceItemsDropped => "catalog_source_items_dropped_total",

            MetricName::NormalizeRecords => "catalog_normalize_records_total",
            MetricName::NormalizeDegradedFields => "catalog_normalize_degraded_fields_total",

            MetricName::BatchFlushes => "catalog_batch_flushes_total",
            MetricName::BatchFlushFailures => "catalog_batch_flush_failures_total",
            MetricName::BatchSize => "catalog_batch_size",

            MetricName::SinkRowsWritten => "catalog_sink_rows_written_total",
            MetricName::SinkWriteFailures => "catalog_sink_write_failures_total",
            MetricName::SinkWriteDuration => "catalog_sink_write_duration_seconds",

            MetricName::StreamsCompleted => "catalog_streams_completed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct MetricsState {
    handle: metrics_exporter_prometheus::PrometheusHandle,
    pushgateway_url: Option<String>,
}

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

/// Install the Prometheus recorder. Push is enabled when `CATALOG_PUSHGATEWAY_URL` is set.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_STATE.get().is_some() {
        return Ok(());
    }

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    let pushgateway_url = std::env::var("CATALOG_PUSHGATEWAY_URL").ok();
    if pushgateway_url.is_some() {
        info!("Metrics system initialized with push gateway support");
    } else {
        info!("Metrics system initialized (no push gateway)");
    }

    METRICS_STATE
        .set(MetricsState {
            handle,
            pushgateway_url,
        })
        .ok();
    Ok(())
}

/// Rendered Prometheus text for everything recorded so far
pub fn render() -> Option<String> {
    METRICS_STATE.get().map(|state| state.handle.render())
}

/// Push the whole registry to the Pushgateway under `instance`
pub async fn push_to_gateway(instance: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(state) = METRICS_STATE.get() else {
        return Ok(());
    };
    let Some(gateway) = state.pushgateway_url.as_deref() else {
        return Ok(());
    };

    let push_url = format!(
        "{}/metrics/job/streaming_catalog/instance/{}",
        gateway.trim_end_matches('/'),
        instance
    );

    let response = reqwest::Client::new()
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(state.handle.render())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!("Pushgateway returned status {}: {}", status, body);
        return Err(format!("Pushgateway returned status {}: {}", status, body).into());
    }

    info!("Pushed metrics to Pushgateway for instance={}", instance);
    Ok(())
}

// ============================================================================
// Source Metrics
// ============================================================================

pub mod source {
    use super::MetricName;

    pub fn page_fetched(provider: &str, items: usize) {
        ::metrics::counter!(MetricName::SourcePagesFetched.as_str(), "provider" => provider.to_string())
            .increment(1);
        ::metrics::histogram!(MetricName::BatchSize.as_str(), "stage" => "page").record(items as f64);
    }

    pub fn page_error(provider: &str) {
        ::metrics::counter!(MetricName::SourcePageErrors.as_str(), "provider" => provider.to_string())
            .increment(1);
    }

    pub fn item_error(provider: &str) {
        ::metrics::counter!(MetricName::SourceItemErrors.as_str(), "provider" => provider.to_string())
            .increment(1);
    }

    /// Item given up after its retries ran out
    pub fn item_dropped(provider: &str) {
        ::metrics::counter!(MetricName::SourceItemsDropped.as_str(), "provider" => provider.to_string())
            .increment(1);
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn records_normalized(count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecords.as_str()).increment(count as u64);
    }

    pub fn field_degraded(field: &'static str) {
        ::metrics::counter!(MetricName::NormalizeDegradedFields.as_str(), "field" => field).increment(1);
    }
}

// ============================================================================
// Batch Metrics
// ============================================================================

pub mod batch {
    use super::MetricName;

    pub fn flushed(records: usize) {
        ::metrics::counter!(MetricName::BatchFlushes.as_str()).increment(1);
        ::metrics::histogram!(MetricName::BatchSize.as_str(), "stage" => "flush").record(records as f64);
    }

    pub fn flush_failed() {
        ::metrics::counter!(MetricName::BatchFlushFailures.as_str()).increment(1);
    }
}

// ============================================================================
// Sink Metrics
// ============================================================================

pub mod sink {
    use super::MetricName;

    pub fn batch_written(rows: usize, secs: f64) {
        ::metrics::counter!(MetricName::SinkRowsWritten.as_str()).increment(rows as u64);
        ::metrics::histogram!(MetricName::SinkWriteDuration.as_str()).record(secs);
    }

    pub fn write_failed() {
        ::metrics::counter!(MetricName::SinkWriteFailures.as_str()).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn stream_completed(stop_reason: &'static str) {
        ::metrics::counter!(MetricName::StreamsCompleted.as_str(), "stop_reason" => stop_reason).increment(1);
    }
}
