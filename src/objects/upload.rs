//! Upload pipeline.
//!
//! Order of operations is fixed: pick the ID, derive the backend key,
//! insert the metadata row, then move the bytes.  A rejected insert means
//! nothing reached the blob store.  A failed transfer leaves the row in
//! place with no bytes behind it; downloads of it fail at the fetch step.

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::{backend_key, generate_object_id, TransferStrategy, UploadPolicy};
use crate::errors::GatewayError;
use crate::metadata::store::{now_rfc3339, MetadataStore, ObjectRecord};
use crate::metrics;
use crate::storage::backend::{BlobReader, BlobStore, CompletedPart};

/// Everything about an upload except its bytes.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Owning principal (a username, or `anon`).
    pub principal: String,
    /// Name the client gave the uploaded file.
    pub original_filename: String,
    /// Exact payload size in bytes.
    pub size: u64,
    /// Client-chosen object ID; empty means generate one.
    pub key: String,
    /// Logical path; empty means use `original_filename`.
    pub path: String,
    /// Access password; empty means public.
    pub password: String,
}

/// Store `reader` and its metadata, returning the object ID.
pub async fn upload(
    store: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    policy: &UploadPolicy,
    request: UploadRequest,
    reader: BlobReader,
) -> Result<String, GatewayError> {
    let object_id = if request.key.is_empty() {
        generate_object_id(policy.id_length)
    } else {
        request.key
    };
    let filename = if request.path.is_empty() {
        request.original_filename
    } else {
        request.path
    };
    if filename.trim_matches('/').is_empty() {
        return Err(GatewayError::Validation("a file name or path is required".to_string()));
    }
    if filename.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(GatewayError::Validation(format!(
            "path may not contain '.' or '..' segments: {filename}"
        )));
    }
    let key = backend_key(&request.principal, &object_id, &filename);

    store
        .insert_object(ObjectRecord {
            id: object_id.clone(),
            username: request.principal.clone(),
            filename: filename.clone(),
            password: request.password,
            backend_key: key.clone(),
            created_at: now_rfc3339(),
        })
        .await?;

    let strategy = policy.strategy_for(request.size);
    info!(
        principal = %request.principal,
        id = %object_id,
        path = %filename,
        size = request.size,
        strategy = strategy.as_str(),
        "upload accepted"
    );

    let transferred = match strategy {
        TransferStrategy::Single => blobs.put(&key, reader, request.size).await,
        TransferStrategy::Multipart => {
            transfer_multipart(blobs, &key, reader, policy.part_size).await
        }
    };
    if let Err(e) = transferred {
        warn!(id = %object_id, backend_key = %key, "transfer failed after metadata insert");
        return Err(GatewayError::Internal(e.context(format!("transfer of {key} failed"))));
    }

    metrics::record_upload(strategy.as_str(), request.size);
    Ok(object_id)
}

/// Sequential multipart transfer; aborts the backend upload on failure.
async fn transfer_multipart(
    blobs: &dyn BlobStore,
    key: &str,
    reader: BlobReader,
    part_size: u64,
) -> anyhow::Result<()> {
    let upload_id = blobs.create_multipart(key).await?;

    let result = match send_parts(blobs, key, &upload_id, reader, part_size).await {
        Ok(parts) => {
            info!(backend_key = %key, parts = parts.len(), "completing multipart transfer");
            blobs.complete_multipart(key, &upload_id, parts).await
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        if let Err(abort_err) = blobs.abort_multipart(key, &upload_id).await {
            warn!(backend_key = %key, "failed to abort multipart transfer: {abort_err}");
        }
    }
    result
}

/// Read `part_size` chunks and upload them in ascending order.
///
/// Every part but the last is exactly `part_size` bytes.
async fn send_parts(
    blobs: &dyn BlobStore,
    key: &str,
    upload_id: &str,
    mut reader: BlobReader,
    part_size: u64,
) -> anyhow::Result<Vec<CompletedPart>> {
    let mut parts = Vec::new();
    let mut part_number: u32 = 1;

    loop {
        let mut buf = Vec::with_capacity(part_size as usize);
        (&mut reader).take(part_size).read_to_end(&mut buf).await?;
        if buf.is_empty() {
            break;
        }
        let short = (buf.len() as u64) < part_size;

        let etag = blobs
            .upload_part(key, upload_id, part_number, Bytes::from(buf))
            .await?;
        parts.push(CompletedPart { part_number, etag });

        if short {
            break;
        }
        part_number += 1;
    }

    Ok(parts)
}
