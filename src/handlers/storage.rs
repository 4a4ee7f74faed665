//! Upload, download and listing handlers under `/storage` and `/anonymous`.

use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::info;

use crate::errors::GatewayError;
use crate::metadata::store::ObjectRecord;
use crate::objects::download::open_download;
use crate::objects::upload::{upload as run_upload, UploadRequest};
use crate::objects::ANONYMOUS_PRINCIPAL;
use crate::server::Principal;
use crate::storage::backend::BlobReader;
use crate::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    /// External ID of the stored object.
    pub uid: String,
}

/// One row of a listing.  The object password is never included.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ObjectView {
    pub id: String,
    pub username: String,
    pub filename: String,
    /// Backend key.
    pub path: String,
    /// Whether downloads need a password.
    pub protected: bool,
    pub created_at: String,
}

impl From<ObjectRecord> for ObjectView {
    fn from(record: ObjectRecord) -> Self {
        Self {
            protected: record.is_protected(),
            id: record.id,
            username: record.username,
            filename: record.filename,
            path: record.backend_key,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub password: String,
}

/// Drain a multipart form, spooling the `file` part to a temp file so its
/// exact size is known before a transfer strategy is chosen.
async fn read_upload_form(
    principal: &str,
    mut form: Multipart,
) -> Result<(UploadRequest, BlobReader), GatewayError> {
    let mut request = UploadRequest {
        principal: principal.to_string(),
        ..Default::default()
    };
    let mut spooled: Option<tokio::fs::File> = None;

    while let Some(mut field) = form
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(format!("failed to parse form: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.original_filename = field.file_name().unwrap_or_default().to_string();
                let std_file = tempfile::tempfile()
                    .map_err(|e| anyhow::anyhow!("failed to create spool file: {e}"))?;
                let mut file = tokio::fs::File::from_std(std_file);
                let mut size: u64 = 0;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| GatewayError::Validation(format!("failed to read file: {e}")))?
                {
                    size += chunk.len() as u64;
                    file.write_all(&chunk).await.map_err(anyhow::Error::from)?;
                }
                file.flush().await.map_err(anyhow::Error::from)?;
                file.rewind().await.map_err(anyhow::Error::from)?;
                request.size = size;
                spooled = Some(file);
            }
            "key" | "path" | "password" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::Validation(format!("invalid {name} field: {e}")))?;
                match name.as_str() {
                    "key" => request.key = value,
                    "path" => request.path = value,
                    _ => request.password = value,
                }
            }
            _ => {}
        }
    }

    let file = spooled.ok_or_else(|| GatewayError::Validation("missing file".to_string()))?;
    Ok((request, Box::pin(file)))
}

async fn handle_upload(
    state: &AppState,
    principal: &str,
    form: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    let (request, reader) = read_upload_form(principal, form).await?;
    let uid = run_upload(
        state.metadata.as_ref(),
        state.blobs.as_ref(),
        &state.upload_policy,
        request,
        reader,
    )
    .await?;
    Ok(Json(UploadResponse { uid }))
}

/// `POST /storage/upload` -- multipart form: `file`, optional `key`,
/// `path`, `password`.
#[utoipa::path(
    post,
    path = "/storage/upload",
    tag = "Storage",
    operation_id = "Upload",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Object stored", body = UploadResponse),
        (status = 400, description = "Malformed form or path already taken"),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    form: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    handle_upload(&state, &principal.username, form).await
}

/// `POST /anonymous/upload` -- as `/storage/upload`, owned by `anon`.
#[utoipa::path(
    post,
    path = "/anonymous/upload",
    tag = "Storage",
    operation_id = "AnonymousUpload",
    responses(
        (status = 200, description = "Object stored", body = UploadResponse),
        (status = 400, description = "Malformed form or path already taken")
    )
)]
pub async fn anonymous_upload(
    State(state): State<Arc<AppState>>,
    form: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    handle_upload(&state, ANONYMOUS_PRINCIPAL, form).await
}

/// `GET /storage/download` and `GET /anonymous/download`.
#[utoipa::path(
    get,
    path = "/anonymous/download",
    tag = "Storage",
    operation_id = "Download",
    params(
        ("key" = String, Query, description = "id, username/id, or username/path"),
        ("password" = Option<String>, Query, description = "Object password")
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 401, description = "Wrong object password"),
        (status = 404, description = "No such object")
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    principal: Option<Extension<Principal>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, GatewayError> {
    let caller = principal
        .map(|Extension(p)| p.username)
        .unwrap_or_else(|| ANONYMOUS_PRINCIPAL.to_string());
    info!(caller = %caller, key = %query.key, "download requested");

    let download = open_download(
        state.metadata.as_ref(),
        state.blobs.as_ref(),
        &query.key,
        &query.password,
    )
    .await?;
    Ok(download.into_response())
}

/// `GET /storage/list` -- the caller's objects.
#[utoipa::path(
    get,
    path = "/storage/list",
    tag = "Storage",
    operation_id = "List",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Caller's objects", body = [ObjectView]),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ObjectView>>, GatewayError> {
    let objects = state.metadata.list_objects_for(&principal.username).await?;
    Ok(Json(objects.into_iter().map(ObjectView::from).collect()))
}

/// `GET /anonymous/list` -- every object (development only).
pub async fn list_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ObjectView>>, GatewayError> {
    let objects = state.metadata.list_objects().await?;
    Ok(Json(objects.into_iter().map(ObjectView::from).collect()))
}
