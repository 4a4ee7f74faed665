//! Blob storage backends.
//!
//! The [`backend::BlobStore`] trait abstracts over where object bytes
//! physically live.  Implementations cover memory, local disk, and an
//! S3-compatible gateway (AWS S3, Cloudflare R2, MinIO).

pub mod backend;
pub mod local;
pub mod memory;
pub mod s3;
