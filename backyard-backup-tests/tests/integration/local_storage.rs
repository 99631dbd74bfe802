//! Streaming into the local provider through the real pipeline

use anyhow::Result;
use async_trait::async_trait;
use backyard_backup::pipeline::{
    ByteProducer, ConduitOptions, ConduitWriter, Pipeline, StoreConsumer, TransferFailure,
};
use backyard_backup::providers::{LocalProvider, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

struct Blocks {
    blocks: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl ByteProducer for Blocks {
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> Result<u64> {
        let block: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        for n in 0..self.blocks {
            if self.fail_after == Some(n) {
                anyhow::bail!("dump tool crashed");
            }
            sink.write_all(&block).await?;
        }
        Ok((self.blocks * block.len()) as u64)
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(ConduitOptions {
        depth: 2,
        chunk_size: 1024,
        ..ConduitOptions::default()
    })
}

fn consumer(provider: &Arc<LocalProvider>, path: &str) -> Box<StoreConsumer> {
    let provider: Arc<dyn Provider> = provider.clone();
    Box::new(StoreConsumer {
        provider,
        path: path.to_string(),
        metadata: HashMap::from([("backup_id".to_string(), "abc".to_string())]),
    })
}

#[tokio::test]
async fn test_stored_size_matches_produced_bytes() {
    let temp = tempfile::TempDir::new().unwrap();
    let provider = Arc::new(LocalProvider::new(temp.path()));
    provider.initialize().await.unwrap();

    let stats = pipeline()
        .run(
            Box::new(Blocks {
                blocks: 256,
                fail_after: None,
            }),
            consumer(&provider, "sqlite/app/full/x.db"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let object = provider.describe("sqlite/app/full/x.db").await.unwrap();
    assert_eq!(stats.bytes_produced, 256 * 4096);
    assert_eq!(object.size, stats.bytes_produced);
    assert_eq!(object.metadata["backup_id"], "abc");
}

#[tokio::test]
async fn test_failed_producer_commits_nothing() {
    let temp = tempfile::TempDir::new().unwrap();
    let provider = Arc::new(LocalProvider::new(temp.path()));
    provider.initialize().await.unwrap();

    let result = pipeline()
        .run(
            Box::new(Blocks {
                blocks: 64,
                fail_after: Some(10),
            }),
            consumer(&provider, "sqlite/app/full/y.db"),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(TransferFailure::Producer(_))));
    assert!(provider.list("").await.unwrap().is_empty());
    assert!(!temp.path().join("sqlite/app/full/y.db.partial").exists());
    assert!(!temp.path().join("sqlite/app/full/y.db.metadata").exists());
}
