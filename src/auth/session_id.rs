//! Session ID generation.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SessionIdSource;

/// Mint a fresh opaque session ID (64 lowercase hex characters).
pub fn new_session_id(source: SessionIdSource) -> String {
    match source {
        SessionIdSource::Random => {
            let mut bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
        SessionIdSource::TimestampHash => {
            // Low entropy: only as unpredictable as the clock.
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            hex::encode(Sha256::digest(nanos.to_string().as_bytes()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_hex_and_unique() {
        let ids: HashSet<_> = (0..256)
            .map(|_| new_session_id(SessionIdSource::Random))
            .collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(id.len(), 64);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_timestamp_hash_shape() {
        let id = new_session_id(SessionIdSource::TimestampHash);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
