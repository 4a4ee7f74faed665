//! Key resolution: turning a client addressing string into a metadata row.

use tracing::debug;

use crate::errors::GatewayError;
use crate::metadata::store::{MetadataStore, ObjectRecord};

/// A parsed addressing string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectAddress {
    /// `id`
    Id(String),
    /// `username/segment`: an object ID, or failing that a one-segment path.
    IdOrPath { username: String, segment: String },
    /// `username/multi/segment/path`
    Path { username: String, path: String },
}

impl ObjectAddress {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        if raw.is_empty() {
            return Err(GatewayError::Validation("key is required".to_string()));
        }
        let Some((username, rest)) = raw.split_once('/') else {
            return Ok(ObjectAddress::Id(raw.to_string()));
        };
        if rest.contains('/') {
            Ok(ObjectAddress::Path {
                username: username.to_string(),
                path: rest.to_string(),
            })
        } else {
            Ok(ObjectAddress::IdOrPath {
                username: username.to_string(),
                segment: rest.to_string(),
            })
        }
    }

    /// Look the address up, applying the ID-then-path fallback for the
    /// ambiguous single-separator form.
    pub async fn resolve(
        &self,
        store: &dyn MetadataStore,
    ) -> Result<Option<ObjectRecord>, GatewayError> {
        match self {
            ObjectAddress::Id(id) => {
                debug!(id = %id, "resolving object by id");
                Ok(store.get_object(id).await?)
            }
            ObjectAddress::IdOrPath { username, segment } => {
                if let Some(found) = store.get_object(segment).await? {
                    debug!(id = %segment, "resolved object by id");
                    return Ok(Some(found));
                }
                debug!(username = %username, path = %segment, "falling back to path lookup");
                Ok(store.get_object_by_path(username, segment).await?)
            }
            ObjectAddress::Path { username, path } => {
                debug!(username = %username, path = %path, "resolving object by path");
                Ok(store.get_object_by_path(username, path).await?)
            }
        }
    }
}
