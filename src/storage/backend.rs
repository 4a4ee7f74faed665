//! Abstract blob store trait.
//!
//! Every storage backend must implement [`BlobStore`].  The trait works
//! in terms of async readers so large objects are never held in memory
//! by callers; backends decide how much to buffer.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A readable byte stream handed to or returned by a backend.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed future returned by every [`BlobStore`] method.
pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// An object fetched from a backend.
pub struct BlobObject {
    /// Object bytes, streamed.
    pub reader: BlobReader,
    /// MIME type recorded by the backend, if any.
    pub content_type: Option<String>,
    /// Total length, if the backend knows it up front.
    pub content_length: Option<u64>,
}

/// One uploaded part of a multipart transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Backend-issued part identifier.
    pub etag: String,
}

/// Reject part lists that are empty or not strictly ascending.
pub fn check_part_order(parts: &[CompletedPart]) -> anyhow::Result<()> {
    if parts.is_empty() {
        anyhow::bail!("multipart completion requires at least one part");
    }
    if parts
        .windows(2)
        .any(|pair| pair[0].part_number >= pair[1].part_number)
    {
        anyhow::bail!("multipart parts are not in ascending part-number order");
    }
    Ok(())
}

/// Async blob storage contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Write the whole of `reader` (`size` bytes) to `key` in one request.
    fn put(&self, key: &str, reader: BlobReader, size: u64) -> BlobFuture<'_, ()>;

    /// Begin a multipart transfer to `key`, returning its upload ID.
    fn create_multipart(&self, key: &str) -> BlobFuture<'_, String>;

    /// Upload one part, returning the part identifier.
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobFuture<'_, String>;

    /// Assemble the listed parts (ascending part-number order) into `key`.
    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobFuture<'_, ()>;

    /// Discard any parts of an unfinished multipart transfer.
    fn abort_multipart(&self, key: &str, upload_id: &str) -> BlobFuture<'_, ()>;

    /// Open the object at `key` for streaming.
    fn get(&self, key: &str) -> BlobFuture<'_, BlobObject>;
}
