//! Download pipeline.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use subtle::ConstantTimeEq;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::address::ObjectAddress;
use crate::errors::GatewayError;
use crate::metadata::store::{MetadataStore, ObjectRecord};
use crate::metrics;
use crate::storage::backend::{BlobObject, BlobStore};

/// A resolved, authorized object whose bytes are ready to stream.
pub struct Download {
    pub record: ObjectRecord,
    pub object: BlobObject,
}

/// Resolve `raw_key`, check the object password, and open the blob.
pub async fn open_download(
    store: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    raw_key: &str,
    password: &str,
) -> Result<Download, GatewayError> {
    let address = ObjectAddress::parse(raw_key)?;
    let record = address
        .resolve(store)
        .await?
        .ok_or_else(|| GatewayError::NotFound("object not found".to_string()))?;

    if record.is_protected() && !passwords_match(&record.password, password) {
        warn!(id = %record.id, "download rejected: wrong object password");
        return Err(GatewayError::Unauthorized);
    }

    let object = blobs.get(&record.backend_key).await?;
    info!(id = %record.id, username = %record.username, "download started");
    metrics::record_download();
    Ok(Download { record, object })
}

fn passwords_match(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Filename offered to the client: the last backend-key segment with
/// quotes, backslashes and control characters removed.
pub fn content_disposition_filename(backend_key: &str) -> String {
    let last = backend_key.rsplit('/').next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        let content_type = self
            .object
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
        let disposition = format!(
            "attachment; filename=\"{}\"",
            content_disposition_filename(&self.record.backend_key)
        );

        let id = self.record.id;
        let stream = ReaderStream::new(self.object.reader).inspect_err(move |e| {
            // Headers are already sent; the client sees a truncated body.
            warn!(id = %id, "download stream aborted: {e}");
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, content_type);
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        if let Some(len) = self.object.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        response
    }
}
