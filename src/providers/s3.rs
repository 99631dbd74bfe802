//! S3-compatible object storage provider
//!
//! Small dumps go up with a single `PutObject`; anything larger than one part
//! uses a multipart upload that is aborted if the source fails, so no object
//! appears unless the stream ended cleanly. Listing needs a `HeadObject` per
//! key because `ListObjectsV2` does not return user metadata.
//!
//! S3 caps user metadata at 2KB of ASCII headers. Only the fixed catalog keys
//! travel as headers; the complete map lives in a `<key>.metadata` JSON
//! object next to the backup and wins when both are present.

use super::Provider;
use crate::config::StorageConfig;
use crate::models::metadata::{
    KEY_BACKUP_ID, KEY_BACKUP_TYPE, KEY_BASE_BACKUP, KEY_DB_TYPE, KEY_IS_COMPRESSED, KEY_PARENT_BACKUP,
    KEY_SOURCE_DB, KEY_START_TIME,
};
use crate::models::StorageObject;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

/// Minimum part size accepted by S3 for all but the last part
const PART_SIZE: usize = 8 * 1024 * 1024;

const METADATA_SUFFIX: &str = ".metadata";

/// Keys small and fixed enough to ride along as `x-amz-meta-*` headers
const HEADER_KEYS: &[&str] = &[
    KEY_BACKUP_ID,
    KEY_BACKUP_TYPE,
    KEY_SOURCE_DB,
    KEY_START_TIME,
    KEY_IS_COMPRESSED,
    KEY_BASE_BACKUP,
    KEY_PARENT_BACKUP,
    KEY_DB_TYPE,
];

pub struct S3Provider {
    client: s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Provider {
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "Static",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn strip_key<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key)
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut buffer = first;
        let mut part_number = 1;

        loop {
            if buffer.is_empty() {
                break;
            }
            total += buffer.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {} of {}", part_number, key))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
            buffer = read_part(source).await?;
        }

        Ok((parts, total))
    }

    async fn head(&self, path: &str) -> Result<StorageObject> {
        let key = self.key(path);
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Object not found: {}", path))?;

        let mut metadata = output.metadata().cloned().unwrap_or_default();
        metadata.extend(self.read_sidecar(&key).await?);

        Ok(StorageObject {
            path: path.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                .unwrap_or_else(Utc::now),
            metadata,
        })
    }

    /// Full metadata map of an object; empty for objects stored without one
    async fn read_sidecar(&self, key: &str) -> Result<HashMap<String, String>> {
        let sidecar = sidecar_key(key);
        let output = match self.client.get_object().bucket(&self.bucket).key(&sidecar).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                return Ok(HashMap::new());
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("Failed to read {}", sidecar))),
        };
        let body = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", sidecar))?
            .into_bytes();
        serde_json::from_slice(&body).with_context(|| format!("Invalid metadata in {}", sidecar))
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete {}", key))?;
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        headers: HashMap<String, String>,
    ) -> Result<u64> {
        let first = read_part(source).await.context("Failed to read source stream")?;

        if first.len() < PART_SIZE {
            let size = first.len() as u64;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .set_metadata(Some(headers))
                .body(ByteStream::from(first))
                .send()
                .await
                .with_context(|| format!("Failed to upload {} to bucket {}", key, self.bucket))?;
            debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, key);
            return Ok(size);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(Some(headers))
            .send()
            .await
            .with_context(|| format!("Failed to start multipart upload for {}", key))?;
        let upload_id = created
            .upload_id()
            .context("Multipart upload returned no upload id")?
            .to_string();

        match self.upload_parts(key, &upload_id, first, source).await {
            Ok((parts, total)) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .with_context(|| format!("Failed to complete multipart upload for {}", key))?;
                debug!("Uploaded {} bytes to s3://{}/{}", total, self.bucket, key);
                Ok(total)
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload for {}: {}", key, abort);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn initialize(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("Bucket '{}' is not accessible", self.bucket))?;
        Ok(())
    }

    async fn store(
        &self,
        path: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        let key = self.key(path);
        let sidecar = sidecar_key(&key);

        // The sidecar goes first; alone it is invisible to listings
        let json = serde_json::to_vec(metadata).context("Failed to serialize metadata")?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&sidecar)
            .content_type("application/json")
            .body(ByteStream::from(json))
            .send()
            .await
            .with_context(|| format!("Failed to upload {} to bucket {}", sidecar, self.bucket))?;

        match self.upload(&key, source, header_metadata(metadata)).await {
            Ok(size) => Ok(size),
            Err(e) => {
                if let Err(cleanup) = self.delete_key(&sidecar).await {
                    warn!("{:#}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn retrieve(&self, path: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let key = self.key(path);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;

        let mut body = output.body.into_async_read();
        let copied = tokio::io::copy(&mut body, sink)
            .await
            .with_context(|| format!("Failed to read body of {}", key))?;
        Ok(copied)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.key(path);
        self.delete_key(&key).await?;
        // S3 deletes of missing keys succeed, so older objects without a sidecar are fine
        self.delete_key(&sidecar_key(&key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        let full_prefix = self.key(prefix);
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", self.bucket, full_prefix))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with(METADATA_SUFFIX) {
                    continue;
                }
                let path = self.strip_key(key).to_string();
                match self.head(&path).await {
                    Ok(described) => objects.push(described),
                    Err(e) => debug!("Skipping {}: {:#}", key, e),
                }
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn describe(&self, path: &str) -> Result<StorageObject> {
        self.head(path).await
    }
}

fn sidecar_key(key: &str) -> String {
    format!("{}{}", key, METADATA_SUFFIX)
}

/// The subset of `metadata` that is safe to send as S3 user metadata
fn header_metadata(metadata: &HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .iter()
        .filter(|(key, _)| HEADER_KEYS.contains(&key.as_str()))
        .filter(|(_, value)| value.bytes().all(|b| b.is_ascii_graphic() || b == b' '))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Read up to one part from the source; empty means end-of-stream
async fn read_part(source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(PART_SIZE);
    let mut limited = source.take(PART_SIZE as u64);
    limited.read_to_end(&mut buffer).await?;
    Ok(buffer)
}
