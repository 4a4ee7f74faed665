//! Local filesystem blob store.
//!
//! Blobs are stored as files under a configurable root directory; the
//! backend key is used directly as a relative path (e.g.
//! `alice/Xy12ab34Cd/docs/report.pdf`).
//!
//! All writes follow crash-only design: write to a temp file, fsync,
//! rename.  Multipart parts live under `{root}/.multipart/{upload_id}/`.

use bytes::Bytes;
use md5::{Digest, Md5};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::backend::{
    check_part_order, BlobFuture, BlobObject, BlobReader, BlobStore, CompletedPart,
};

/// Stores blobs on the local filesystem.
pub struct LocalBlobStore {
    /// Root directory for all stored blobs.
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new `LocalBlobStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        std::fs::create_dir_all(root.join(".multipart"))?;
        Ok(Self { root })
    }

    /// Resolve a backend key to a file path, rejecting anything that could
    /// escape the root.
    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty() {
            anyhow::bail!("empty storage key");
        }
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) => {}
                _ => anyhow::bail!("Path traversal detected in storage key: {}", key),
            }
        }
        Ok(self.root.join(key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(format!("tmp-{}", uuid::Uuid::new_v4()))
    }

    fn part_dir(&self, upload_id: &str) -> anyhow::Result<PathBuf> {
        // Upload IDs are UUIDs minted by this backend.
        if uuid::Uuid::parse_str(upload_id).is_err() {
            anyhow::bail!("invalid multipart upload id: {upload_id}");
        }
        Ok(self.root.join(".multipart").join(upload_id))
    }

    /// Move a fully written temp file into place at `final_path`.
    async fn commit(&self, tmp_path: &Path, final_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(tmp_path, final_path).await?;
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, key: &str, mut reader: BlobReader, _size: u64) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&key)?;
            let tmp_path = self.temp_path();

            let mut file = fs::File::create(&tmp_path).await?;
            let copied = tokio::io::copy(&mut reader, &mut file).await;
            if let Err(e) = copied {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
            file.sync_all().await?;
            drop(file);

            self.commit(&tmp_path, &final_path).await
        })
    }

    fn create_multipart(&self, _key: &str) -> BlobFuture<'_, String> {
        Box::pin(async move {
            let upload_id = uuid::Uuid::new_v4().to_string();
            fs::create_dir_all(self.part_dir(&upload_id)?).await?;
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobFuture<'_, String> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let part_dir = self.part_dir(&upload_id)?;
            if !fs::try_exists(&part_dir).await? {
                anyhow::bail!("no such multipart upload: {upload_id}");
            }

            let mut hasher = Md5::new();
            hasher.update(&data);
            let etag = format!("\"{}\"", hex::encode(hasher.finalize()));

            let tmp_path = self.temp_path();
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            self.commit(&tmp_path, &part_dir.join(part_number.to_string()))
                .await?;

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
            let final_path = self.resolve(&key)?;
            let part_dir = self.part_dir(&upload_id)?;

            let tmp_path = self.temp_path();
            let mut output = fs::File::create(&tmp_path).await?;
            for part in &parts {
                let part_path = part_dir.join(part.part_number.to_string());
                let mut input = fs::File::open(&part_path).await.map_err(|e| {
                    anyhow::anyhow!("Failed to read part {}: {}", part.part_number, e)
                })?;
                tokio::io::copy(&mut input, &mut output).await?;
            }
            output.sync_all().await?;
            drop(output);

            self.commit(&tmp_path, &final_path).await?;
            fs::remove_dir_all(&part_dir).await?;
            Ok(())
        })
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> BlobFuture<'_, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let part_dir = self.part_dir(&upload_id)?;
            if fs::try_exists(&part_dir).await? {
                fs::remove_dir_all(&part_dir).await?;
            }
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BlobFuture<'_, BlobObject> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            let file = fs::File::open(&path)
                .await
                .map_err(|e| anyhow::anyhow!("Object not found at storage key {key}: {e}"))?;
            let len = file.metadata().await?.len();
            Ok(BlobObject {
                reader: Box::pin(file),
                content_type: None,
                content_length: Some(len),
            })
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn test_store() -> (tempfile::TempDir, LocalBlobStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = LocalBlobStore::new(dir.path()).expect("failed to create store");
        (dir, store)
    }

    async fn read_all(obj: BlobObject) -> Vec<u8> {
        let mut reader = obj.reader;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    fn reader(data: &'static [u8]) -> BlobReader {
        Box::pin(std::io::Cursor::new(data))
    }

    #[tokio::test]
    async fn test_put_and_get_nested_key() {
        let (dir, store) = test_store();
        store
            .put("alice/abc123/docs/a.txt", reader(b"hello"), 5)
            .await
            .unwrap();

        assert!(dir.path().join("alice/abc123/docs/a.txt").is_file());
        let obj = store.get("alice/abc123/docs/a.txt").await.unwrap();
        assert_eq!(obj.content_length, Some(5));
        assert_eq!(read_all(obj).await, b"hello");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, store) = test_store();
        assert!(store.put("../escape", reader(b"x"), 1).await.is_err());
        assert!(store.put("/abs/path", reader(b"x"), 1).await.is_err());
        assert!(store.get("a/../../b").await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_fails() {
        let (_dir, store) = test_store();
        assert!(store.get("nobody/none/file").await.is_err());
    }

    #[tokio::test]
    async fn test_multipart_roundtrip_and_cleanup() {
        let (dir, store) = test_store();
        let key = "bob/id/big.bin";
        let id = store.create_multipart(key).await.unwrap();
        let mut parts = Vec::new();
        for (n, chunk) in [&b"one-"[..], &b"two-"[..], &b"three"[..]].iter().enumerate() {
            let part_number = n as u32 + 1;
            let etag = store
                .upload_part(key, &id, part_number, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
            parts.push(CompletedPart { part_number, etag });
        }
        store.complete_multipart(key, &id, parts).await.unwrap();

        assert_eq!(read_all(store.get(key).await.unwrap()).await, b"one-two-three");
        assert!(!dir.path().join(".multipart").join(&id).exists());
    }

    #[tokio::test]
    async fn test_abort_removes_parts() {
        let (dir, store) = test_store();
        let id = store.create_multipart("k/x/y").await.unwrap();
        store
            .upload_part("k/x/y", &id, 1, Bytes::from_static(b"data"))
            .await
            .unwrap();
        store.abort_multipart("k/x/y", &id).await.unwrap();
        assert!(!dir.path().join(".multipart").join(&id).exists());
        // Idempotent.
        store.abort_multipart("k/x/y", &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_part_unknown_upload() {
        let (_dir, store) = test_store();
        let bogus = uuid::Uuid::new_v4().to_string();
        assert!(store
            .upload_part("k", &bogus, 1, Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(store
            .upload_part("k", "../../etc", 1, Bytes::from_static(b"x"))
            .await
            .is_err());
    }
}
