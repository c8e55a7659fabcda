use crate::error::{CatalogError, Result};
use crate::storage::{PersistenceSink, TableTarget};
use crate::types::NormalizedRecord;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters for one accumulator's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub appended: usize,
    pub flushes: usize,
    pub failed_flushes: usize,
    pub drains: usize,
    pub records_persisted: usize,
}

/// Buffers normalized records and hands them to the sink in batches of at
/// most `threshold` records.
///
/// A failed flush keeps its records buffered; the next attempt happens once
/// another `threshold` records have arrived, or on `drain`.
pub struct BatchAccumulator {
    buffer: Vec<NormalizedRecord>,
    threshold: usize,
    next_flush_at: usize,
    sink: Arc<dyn PersistenceSink>,
    target: TableTarget,
    stats: BatchStats,
}

impl BatchAccumulator {
    pub fn new(sink: Arc<dyn PersistenceSink>, target: TableTarget, threshold: usize) -> Result<Self> {
        if threshold == 0 {
            return Err(CatalogError::Config("batch size must be at least 1".to_string()));
        }
        Ok(Self {
            buffer: Vec::with_capacity(threshold),
            threshold,
            next_flush_at: threshold,
            sink,
            target,
            stats: BatchStats::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn target(&self) -> &TableTarget {
        &self.target
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub async fn append(&mut self, record: NormalizedRecord) -> Result<()> {
        self.buffer.push(record);
        self.stats.appended += 1;

        if self.buffer.len() >= self.next_flush_at {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes the buffer in batches of at most `threshold` records.
    ///
    /// Stops at the first failed write; that batch and everything after it stay buffered.
    pub async fn flush(&mut self) -> Result<()> {
        while !self.buffer.is_empty() {
            let batch_size = self.buffer.len().min(self.threshold);
            match self.sink.write(&self.buffer[..batch_size], &self.target).await {
                Ok(written) => {
                    self.buffer.drain(..batch_size);
                    self.stats.flushes += 1;
                    self.stats.records_persisted += written;
                    crate::metrics::batch::flushed(written);
                    info!("💾 {} records saved to table '{}'", written, self.target);
                }
                Err(e) => {
                    self.next_flush_at = self.buffer.len() + self.threshold;
                    self.stats.failed_flushes += 1;
                    crate::metrics::batch::flush_failed();
                    warn!(
                        table = %self.target,
                        batch_size,
                        buffered = self.buffer.len(),
                        "Batch not persisted; keeping {} records buffered: {}",
                        self.buffer.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        self.next_flush_at = self.threshold;
        Ok(())
    }

    /// Final flush at end of stream, regardless of threshold.
    pub async fn drain(&mut self) -> Result<()> {
        self.stats.drains += 1;
        debug!("Draining {} buffered records for {}", self.buffer.len(), self.target);
        self.flush().await
    }
}

impl Drop for BatchAccumulator {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            error!(
                table = %self.target,
                batch_size = self.buffer.len(),
                "Accumulator dropped with {} unpersisted records",
                self.buffer.len()
            );
        }
    }
}
