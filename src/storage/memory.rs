//! In-memory blob store.
//!
//! Objects and in-flight multipart parts are held in
//! `tokio::sync::RwLock<HashMap<...>>` maps.  Nothing is persisted; used
//! by tests and by `storage.backend: memory` for throwaway deployments.

use bytes::Bytes;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::backend::{
    check_part_order, BlobFuture, BlobObject, BlobReader, BlobStore, CompletedPart,
};

/// An unfinished multipart transfer.
struct PendingUpload {
    key: String,
    /// part number -> (data, etag)
    parts: BTreeMap<u32, (Bytes, String)>,
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    /// key -> data
    objects: RwLock<HashMap<String, Bytes>>,
    /// upload id -> pending upload
    uploads: RwLock<HashMap<String, PendingUpload>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Keys currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of multipart transfers begun but neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, mut reader: BlobReader, size: u64) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut buf = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut buf).await?;
            self.objects.write().await.insert(key, Bytes::from(buf));
            Ok(())
        })
    }

    fn create_multipart(&self, key: &str) -> BlobFuture<'_, String> {
        let key = key.to_string();
        Box::pin(async move {
            let upload_id = uuid::Uuid::new_v4().to_string();
            self.uploads.write().await.insert(
                upload_id.clone(),
                PendingUpload {
                    key,
                    parts: BTreeMap::new(),
                },
            );
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
            let mut uploads = self.uploads.write().await;
            let pending = uploads
                .get_mut(&upload_id)
                .filter(|p| p.key == key)
                .ok_or_else(|| anyhow::anyhow!("no such multipart upload: {upload_id}"))?;
            let etag = Self::compute_etag(&data);
            pending.parts.insert(part_number, (data, etag.clone()));
            Ok(etag)
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
            let pending = {
                let mut uploads = self.uploads.write().await;
                match uploads.remove(&upload_id) {
                    Some(p) if p.key == key => p,
                    Some(p) => {
                        uploads.insert(upload_id.clone(), p);
                        anyhow::bail!("no such multipart upload: {upload_id}");
                    }
                    None => anyhow::bail!("no such multipart upload: {upload_id}"),
                }
            };

            let mut assembled = Vec::new();
            for part in &parts {
                let (data, etag) = pending
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| anyhow::anyhow!("missing part {}", part.part_number))?;
                if *etag != part.etag {
                    anyhow::bail!("etag mismatch for part {}", part.part_number);
                }
                assembled.extend_from_slice(data);
            }
            self.objects
                .write()
                .await
                .insert(key, Bytes::from(assembled));
            Ok(())
        })
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> BlobFuture<'_, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.uploads.write().await.remove(&upload_id);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BlobFuture<'_, BlobObject> {
        let key = key.to_string();
        Box::pin(async move {
            let data = self
                .objects
                .read()
                .await
                .get(&key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("object not found at storage key: {key}"))?;
            let len = data.len() as u64;
            Ok(BlobObject {
                reader: Box::pin(std::io::Cursor::new(data)),
                content_type: None,
                content_length: Some(len),
            })
        })
    }
}
