//! Object addressing and the upload/download pipelines.
//!
//! An object has three names: its externally addressable ID, its logical
//! path inside the owner's namespace, and the backend key under which the
//! blob store keeps the bytes.  The backend key is derived from the other
//! two (`principal/id/path`), so two rows can never share one.

pub mod address;
pub mod download;
pub mod upload;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::UploadConfig;

/// Principal used for unauthenticated uploads.
pub const ANONYMOUS_PRINCIPAL: &str = "anon";

/// Generate a random alphanumeric object ID of `len` characters.
pub fn generate_object_id(len: usize) -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Derive the blob-store key for an object.
pub fn backend_key(principal: &str, object_id: &str, logical_path: &str) -> String {
    format!(
        "{principal}/{object_id}/{}",
        logical_path.trim_matches('/')
    )
}

/// How a payload is moved to the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// One direct put.
    Single,
    /// Sequential fixed-size parts.
    Multipart,
}

impl TransferStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStrategy::Single => "single",
            TransferStrategy::Multipart => "multipart",
        }
    }
}

/// Size-dependent transfer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Sizes at or above this use multipart.
    pub multipart_threshold: u64,
    /// Bytes per multipart part (all but the last part are exactly this).
    pub part_size: u64,
    /// Length of generated object IDs.
    pub id_length: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            multipart_threshold: config.multipart_threshold,
            part_size: config.part_size,
            id_length: config.id_length,
        }
    }
}

impl UploadPolicy {
    pub fn strategy_for(&self, size: u64) -> TransferStrategy {
        if size >= self.multipart_threshold {
            TransferStrategy::Multipart
        } else {
            TransferStrategy::Single
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_shape() {
        let id = generate_object_id(10);
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_object_id(10), generate_object_id(10));
    }

    #[test]
    fn test_backend_key_trims_separators() {
        assert_eq!(backend_key("alice", "abc", "notes.txt"), "alice/abc/notes.txt");
        assert_eq!(backend_key("alice", "abc", "/dir/notes.txt/"), "alice/abc/dir/notes.txt");
    }

    #[test]
    fn test_strategy_threshold_is_inclusive() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.multipart_threshold, 100 * 1024 * 1024);
        assert_eq!(policy.strategy_for(0), TransferStrategy::Single);
        assert_eq!(
            policy.strategy_for(policy.multipart_threshold - 1),
            TransferStrategy::Single
        );
        assert_eq!(
            policy.strategy_for(policy.multipart_threshold),
            TransferStrategy::Multipart
        );
    }
}
