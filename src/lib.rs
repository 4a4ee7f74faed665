//! Filegate library -- session-authenticated file storage gateway.
//!
//! This crate provides the components for running the gateway: account
//! and session management, object metadata persistence, pluggable blob
//! storage backends, and the HTTP surface tying them together.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod objects;
pub mod server;
pub mod storage;

use crate::auth::geo::Geolocator;
use crate::auth::AuthService;
use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::objects::UploadPolicy;
use crate::storage::backend::BlobStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Metadata store (SQLite or in-memory).
    pub metadata: Arc<dyn MetadataStore>,
    /// Blob storage backend (local filesystem, memory, or S3-compatible).
    pub blobs: Arc<dyn BlobStore>,
    /// Registration, login and session resolution.
    pub auth: AuthService,
    /// Transfer tuning derived from `config.upload`.
    pub upload_policy: UploadPolicy,
}

impl AppState {
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        geo: Box<dyn Geolocator>,
    ) -> Self {
        let auth = AuthService::new(metadata.clone(), geo, config.auth.session_ids);
        let upload_policy = UploadPolicy::from(&config.upload);
        Self {
            config,
            metadata,
            blobs,
            auth,
            upload_policy,
        }
    }
}
