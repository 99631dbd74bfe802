//! Streaming transfer pipeline
//!
//! Couples one byte producer (a database dump, or a storage retrieve) to one
//! byte consumer (a storage store, or a database restore) through a bounded
//! [`conduit`]. Both sides run as separate tasks; the caller waits for both.
//!
//! The transfer fails if either side fails, even when the other reported
//! success. A producer failure takes precedence over the consumer failure it
//! usually causes.

pub mod conduit;
mod stages;

pub use conduit::{conduit, ConduitOptions, ConduitReader, ConduitWriter, WriterStats};
pub use stages::{DumpProducer, FileConsumer, RestoreConsumer, RetrieveProducer, StoreConsumer};

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Write side of a transfer
#[async_trait]
pub trait ByteProducer: Send + 'static {
    /// Write the whole payload into the sink and return the byte count.
    /// The pipeline closes the sink.
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> anyhow::Result<u64>;
}

/// Read side of a transfer
#[async_trait]
pub trait ByteConsumer: Send + 'static {
    /// Consume the source until end-of-stream and return the byte count
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> anyhow::Result<u64>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransferFailure {
    #[error("producer failed: {0:#}")]
    Producer(anyhow::Error),

    #[error("consumer failed: {0:#}")]
    Consumer(anyhow::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

/// Byte counts of a completed transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes the producer wrote
    pub bytes_produced: u64,
    /// Bytes that crossed the conduit (after encoding)
    pub bytes_transferred: u64,
    /// Bytes the consumer reported
    pub bytes_consumed: u64,
}

/// Runs producer/consumer pairs over a conduit
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: ConduitOptions,
    grace: Duration,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(ConduitOptions::default())
    }
}

impl Pipeline {
    pub fn new(options: ConduitOptions) -> Self {
        Self {
            options,
            grace: Duration::from_secs(10),
        }
    }

    /// Time allowed for both tasks to wind down after cancellation
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn options(&self) -> &ConduitOptions {
        &self.options
    }

    /// Same sizing, encoding set up for storing a backup
    pub fn for_backup(&self, compress: bool, max_bytes: Option<u64>) -> Self {
        let mut pipeline = self.clone();
        pipeline.options.encode_gzip = compress;
        pipeline.options.decode_gzip = false;
        pipeline.options.max_bytes = max_bytes;
        pipeline
    }

    /// Same sizing, decoding set up for reading a backup back
    pub fn for_restore(&self, compressed: bool) -> Self {
        let mut pipeline = self.clone();
        pipeline.options.encode_gzip = false;
        pipeline.options.decode_gzip = compressed;
        pipeline.options.max_bytes = None;
        pipeline
    }

    /// Run both sides concurrently and wait for both to finish
    pub async fn run(
        &self,
        producer: Box<dyn ByteProducer>,
        consumer: Box<dyn ByteConsumer>,
        cancel: &CancellationToken,
    ) -> Result<TransferStats, TransferFailure> {
        let (mut writer, mut reader) = conduit(&self.options);

        let producer_cancel = cancel.clone();
        let producer_task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = producer_cancel.cancelled() => Err(anyhow::anyhow!("transfer cancelled")),
                res = produce_all(producer, &mut writer) => res,
            };
            if let Err(ref e) = outcome {
                writer.abort(&format!("{:#}", e));
            }
            outcome
        });

        let consumer_task = tokio::spawn(async move { consumer.consume(&mut reader).await });

        let producer_abort = producer_task.abort_handle();
        let consumer_abort = consumer_task.abort_handle();
        let joined = async { tokio::join!(producer_task, consumer_task) };
        tokio::pin!(joined);

        let (produced, consumed) = tokio::select! {
            results = &mut joined => results,
            _ = cancel.cancelled() => {
                debug!("Transfer cancelled, waiting up to {:?} for tasks to stop", self.grace);
                match tokio::time::timeout(self.grace, &mut joined).await {
                    Ok(results) => results,
                    Err(_) => {
                        warn!("Transfer tasks did not stop within {:?}, aborting them", self.grace);
                        producer_abort.abort();
                        consumer_abort.abort();
                        return Err(TransferFailure::Cancelled);
                    }
                }
            }
        };

        let produced = produced
            .map_err(|e| anyhow::anyhow!("producer task failed: {}", e))
            .and_then(|r| r);
        let consumed = consumed
            .map_err(|e| anyhow::anyhow!("consumer task failed: {}", e))
            .and_then(|r| r);

        // A cancellation that lands after both sides finished does not undo the transfer
        match (produced, consumed) {
            (Err(_), _) | (_, Err(_)) if cancel.is_cancelled() => Err(TransferFailure::Cancelled),
            (Err(e), _) => Err(TransferFailure::Producer(e)),
            (Ok(_), Err(e)) => Err(TransferFailure::Consumer(e)),
            (Ok((bytes_produced, writer_stats)), Ok(bytes_consumed)) => Ok(TransferStats {
                bytes_produced,
                bytes_transferred: writer_stats.bytes_sent,
                bytes_consumed,
            }),
        }
    }
}

async fn produce_all(
    producer: Box<dyn ByteProducer>,
    writer: &mut ConduitWriter,
) -> anyhow::Result<(u64, WriterStats)> {
    let produced = producer.produce(writer).await?;
    let stats = writer.finish().await?;
    Ok((produced, stats))
}
