//! S3-compatible gateway blob store.
//!
//! Forwards blob operations to a single upstream bucket on AWS S3,
//! Cloudflare R2 or any other S3-compatible service.  Backend keys are
//! used verbatim as upstream object keys.
//!
//! Credentials are taken from the config when given, otherwise resolved
//! via the standard AWS credential chain (env vars, `~/.aws/credentials`,
//! IAM role, etc.).

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::backend::{
    check_part_order, BlobFuture, BlobObject, BlobReader, BlobStore, CompletedPart,
};
use crate::config::S3StorageConfig;

/// Gateway backend that forwards operations to an S3-compatible service.
pub struct S3BlobStore {
    /// AWS S3 SDK client.
    client: Client,
    /// The upstream bucket name.
    bucket: String,
}

impl S3BlobStore {
    /// Build a client from the storage config.
    pub async fn new(config: &S3StorageConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = config.resolved_endpoint() {
            loader = loader.endpoint_url(endpoint);
        }

        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "filegate-config",
            );
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();

        info!(
            "S3 blob store initialized: bucket={} endpoint={:?}",
            config.bucket,
            config.resolved_endpoint()
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }
}

/// Read size of each copy step while spooling a put body.
const SPOOL_CHUNK: usize = 64 * 1024;

/// Copy `reader` into a named temp file one [`SPOOL_CHUNK`] at a time.
///
/// Returns the file (deleted on drop) and the number of bytes written.
async fn spool_to_disk(mut reader: BlobReader) -> anyhow::Result<(NamedTempFile, u64)> {
    let spooled = NamedTempFile::new()?;
    let mut file = tokio::fs::File::from_std(spooled.reopen()?);
    let mut chunk = vec![0u8; SPOOL_CHUNK];
    let mut written: u64 = 0;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n]).await?;
        written += n as u64;
    }
    file.flush().await?;
    Ok((spooled, written))
}

impl BlobStore for S3BlobStore {
    fn put(&self, key: &str, reader: BlobReader, size: u64) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            // The SDK wants a sized, rewindable body; a disk spool gives it
            // one without holding the payload in memory.
            let (spooled, written) = spool_to_disk(reader).await?;
            if written != size {
                anyhow::bail!(
                    "S3 put_object: body is {written} bytes but {size} were declared"
                );
            }
            let body = ByteStream::from_path(spooled.path())
                .await
                .map_err(|e| Self::map_sdk_error("put_object body", e))?;

            debug!("S3 put_object: bucket={} key={} size={}", self.bucket, key, size);

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_length(size as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e.into_service_error()))?;
            Ok(())
        })
    }

    fn create_multipart(&self, key: &str) -> BlobFuture<'_, String> {
        let key = key.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("create_multipart_upload", e.into_service_error())
                })?;

            let upload_id = resp
                .upload_id()
                .ok_or_else(|| anyhow::anyhow!("S3 did not return an upload ID"))?
                .to_string();
            debug!("S3 create_multipart_upload: key={} upload_id={}", key, upload_id);
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobFuture<'_, String> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let part_number = i32::try_from(part_number)
                .map_err(|_| anyhow::anyhow!("part number {part_number} out of range"))?;

            debug!(
                "S3 upload_part: key={} upload_id={} part={} size={}",
                key,
                upload_id,
                part_number,
                data.len()
            );

            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .content_length(data.len() as i64)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e.into_service_error()))?;

            resp.e_tag()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("S3 did not return an ETag for part {part_number}"))
        })
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            check_part_order(&parts)?;

            let mut completed = Vec::with_capacity(parts.len());
            for part in &parts {
                let part_number = i32::try_from(part.part_number).map_err(|_| {
                    anyhow::anyhow!("part number {} out of range", part.part_number)
                })?;
                completed.push(
                    S3CompletedPart::builder()
                        .e_tag(&part.etag)
                        .part_number(part_number)
                        .build(),
                );
            }

            debug!(
                "S3 complete_multipart_upload: key={} upload_id={} parts={}",
                key,
                upload_id,
                completed.len()
            );

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(completed))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("complete_multipart_upload", e.into_service_error())
                })?;
            Ok(())
        })
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("abort_multipart_upload", e.into_service_error())
                })?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BlobFuture<'_, BlobObject> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("S3 get_object: bucket={} key={}", self.bucket, key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        anyhow::anyhow!("Object not found at storage key: {key}")
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let content_type = resp.content_type().map(str::to_string);
            let content_length = resp.content_length().and_then(|n| u64::try_from(n).ok());

            Ok(BlobObject {
                reader: Box::pin(resp.body.into_async_read()),
                content_type,
                content_length,
            })
        })
    }
}
