//! Backpressure, cancellation and failure propagation of the transfer pipeline

use anyhow::Result;
use async_trait::async_trait;
use backyard_backup::pipeline::{
    ByteConsumer, ByteProducer, ConduitOptions, ConduitReader, ConduitWriter, Pipeline, TransferFailure,
};
use parking_lot::Mutex;
use rstest::rstest;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const TOTAL: usize = 64 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Writes `TOTAL` pattern bytes, `step` bytes per write
struct PatternProducer {
    step: usize,
    fail_at: Option<usize>,
}

#[async_trait]
impl ByteProducer for PatternProducer {
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> Result<u64> {
        let data = pattern(TOTAL);
        let mut written = 0;
        for chunk in data.chunks(self.step) {
            if let Some(limit) = self.fail_at {
                if written >= limit {
                    anyhow::bail!("producer died after {} bytes", written);
                }
            }
            sink.write_all(chunk).await?;
            written += chunk.len();
            tokio::task::yield_now().await;
        }
        Ok(written as u64)
    }
}

/// Reads at most `step` bytes per read and keeps them
struct CollectingConsumer {
    step: usize,
    delay: Option<Duration>,
    received: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl ByteConsumer for CollectingConsumer {
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> Result<u64> {
        let mut buf = vec![0u8; self.step];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.received.lock().extend_from_slice(&buf[..n]);
            total += n as u64;
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
        }
        Ok(total)
    }
}

/// Writes a little, then never finishes
struct StalledProducer;

#[async_trait]
impl ByteProducer for StalledProducer {
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> Result<u64> {
        sink.write_all(b"header").await?;
        sink.flush().await?;
        std::future::pending::<()>().await;
        Ok(6)
    }
}

/// Ignores its source and cancellation alike
struct DeafConsumer;

#[async_trait]
impl ByteConsumer for DeafConsumer {
    async fn consume(self: Box<Self>, _source: &mut ConduitReader) -> Result<u64> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0)
    }
}

/// Drains its source, then cancels the run it belongs to
struct LateCancelConsumer {
    cancel: CancellationToken,
}

#[async_trait]
impl ByteConsumer for LateCancelConsumer {
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> Result<u64> {
        let mut sink = Vec::new();
        let total = source.read_to_end(&mut sink).await?;
        self.cancel.cancel();
        Ok(total as u64)
    }
}

fn tight_pipeline() -> Pipeline {
    Pipeline::new(ConduitOptions {
        depth: 2,
        chunk_size: 512,
        ..ConduitOptions::default()
    })
    .with_grace(Duration::from_millis(200))
}

#[rstest]
#[case::fast_consumer(1, 1000)]
#[case::slow_consumer(1000, 1)]
#[case::even(64, 64)]
#[case::slightly_slow_consumer(100, 10)]
#[case::slightly_slow_producer(10, 100)]
#[tokio::test]
async fn test_backpressure_preserves_every_byte(#[case] write_step: usize, #[case] read_step: usize) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let stats = tight_pipeline()
        .run(
            Box::new(PatternProducer {
                step: write_step,
                fail_at: None,
            }),
            Box::new(CollectingConsumer {
                step: read_step,
                delay: None,
                received: received.clone(),
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(stats.bytes_produced, TOTAL as u64);
    assert_eq!(stats.bytes_consumed, TOTAL as u64);
    assert_eq!(*received.lock(), pattern(TOTAL));
}

#[tokio::test]
async fn test_sleeping_consumer_suspends_producer() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let stats = tight_pipeline()
        .run(
            Box::new(PatternProducer {
                step: 4096,
                fail_at: None,
            }),
            Box::new(CollectingConsumer {
                step: 8192,
                delay: Some(Duration::from_millis(1)),
                received: received.clone(),
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(stats.bytes_consumed, TOTAL as u64);
    assert_eq!(received.lock().len(), TOTAL);
}

#[tokio::test]
async fn test_compressed_transfer_reports_encoded_size() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let stats = tight_pipeline()
        .for_backup(true, None)
        .run(
            Box::new(PatternProducer {
                step: 1024,
                fail_at: None,
            }),
            Box::new(CollectingConsumer {
                step: 1024,
                delay: None,
                received: received.clone(),
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(stats.bytes_produced, TOTAL as u64);
    assert_eq!(stats.bytes_consumed, stats.bytes_transferred);
    assert!(stats.bytes_transferred < TOTAL as u64);
}

#[tokio::test]
async fn test_producer_failure_fails_transfer_after_partial_output() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let result = tight_pipeline()
        .run(
            Box::new(PatternProducer {
                step: 1024,
                fail_at: Some(8 * 1024),
            }),
            Box::new(CollectingConsumer {
                step: 1024,
                delay: None,
                received: received.clone(),
            }),
            &CancellationToken::new(),
        )
        .await;

    match result {
        Err(TransferFailure::Producer(e)) => assert!(e.to_string().contains("producer died")),
        other => panic!("expected producer failure, got {:?}", other),
    }
    assert!(received.lock().len() < TOTAL);
}

#[tokio::test]
async fn test_max_size_aborts_transfer() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let result = tight_pipeline()
        .for_backup(false, Some(1024))
        .run(
            Box::new(PatternProducer {
                step: 512,
                fail_at: None,
            }),
            Box::new(CollectingConsumer {
                step: 512,
                delay: None,
                received,
            }),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(TransferFailure::Producer(_))));
}

#[tokio::test]
async fn test_cancel_returns_within_grace() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tight_pipeline().run(
            Box::new(StalledProducer),
            Box::new(CollectingConsumer {
                step: 64,
                delay: None,
                received,
            }),
            &cancel,
        ),
    )
    .await
    .expect("pipeline did not return after cancellation");

    assert!(matches!(result, Err(TransferFailure::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancel_aborts_tasks_that_ignore_it() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tight_pipeline().run(Box::new(StalledProducer), Box::new(DeafConsumer), &cancel),
    )
    .await
    .expect("pipeline did not return after cancellation");

    assert!(matches!(result, Err(TransferFailure::Cancelled)));
    // 20ms until cancel plus 200ms grace
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cancel_after_both_sides_finished_keeps_result() {
    let cancel = CancellationToken::new();
    let stats = tight_pipeline()
        .run(
            Box::new(PatternProducer {
                step: 4096,
                fail_at: None,
            }),
            Box::new(LateCancelConsumer { cancel: cancel.clone() }),
            &cancel,
        )
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(stats.bytes_produced, TOTAL as u64);
    assert_eq!(stats.bytes_consumed, TOTAL as u64);
}

#[tokio::test]
async fn test_cancelled_before_start_never_completes() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = tight_pipeline()
        .run(
            Box::new(PatternProducer {
                step: TOTAL,
                fail_at: None,
            }),
            Box::new(CollectingConsumer {
                step: 1024,
                delay: None,
                received: Arc::new(Mutex::new(Vec::new())),
            }),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(TransferFailure::Cancelled)));
}
