use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::Caller;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{NewStoredFile, StoredFile};
use crate::schema::stored_files;
use crate::state::AppState;
use crate::storage::{inline_content_disposition, object_key};
use crate::utils::time::to_iso;

#[derive(Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
    pub created_at: String,
}

impl From<StoredFile> for FileResponse {
    fn from(file: StoredFile) -> Self {
        Self {
            id: file.id,
            original_name: file.original_name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            uploaded_by: file.uploaded_by,
            created_at: to_iso(file.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct FileUrlResponse {
    pub id: Uuid,
    pub url: String,
    pub expires_in: u64,
}

pub(crate) fn ensure_file_exists(conn: &mut PgConnection, file_id: Uuid) -> AppResult<()> {
    let found = stored_files::table
        .find(file_id)
        .select(stored_files::id)
        .first::<Uuid>(conn)
        .optional()?;
    found.map(|_| ()).ok_or_else(|| AppError::entity_not_found("file"))
}

pub(crate) fn load_files(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<Vec<StoredFile>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(stored_files::table
        .filter(stored_files::id.eq_any(ids))
        .load(conn)?)
}

/// Presigned download URLs keyed by file id. Must be called without holding
/// a pooled connection.
pub(crate) async fn presigned_urls(
    state: &AppState,
    files: &[StoredFile],
) -> AppResult<HashMap<Uuid, String>> {
    let mut urls = HashMap::with_capacity(files.len());
    for file in files {
        let url = state
            .storage
            .presign_get_object(&file.storage_key, state.file_url_expiry())
            .await
            .map_err(|err| {
                error!(error = %err, file_id = %file.id, "failed to presign file url");
                AppError::internal(format!("failed to presign file url: {err}"))
            })?;
        urls.insert(file.id, url);
    }
    Ok(urls)
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<FileResponse>)> {
    {
        let mut conn = state.db()?;
        Caller::resolve(&mut conn, &user)?;
    }

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        original_name = field.file_name().map(|n| n.to_string());
        content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            warn!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file_bytes = Some(data.to_vec());
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name = original_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = content_type.or_else(|| {
        mime_guess::from_path(&original_name)
            .first()
            .map(|mime| mime.to_string())
    });

    let file_id = Uuid::new_v4();
    let key = object_key(file_id, &original_name);
    let size_bytes = bytes.len() as i64;

    state
        .storage
        .put_object(
            &key,
            bytes,
            content_type.clone(),
            inline_content_disposition(&original_name),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %key, "failed to store file");
            AppError::internal(format!("failed to store file: {err}"))
        })?;

    let mut conn = state.db()?;
    let stored: StoredFile = diesel::insert_into(stored_files::table)
        .values(&NewStoredFile {
            id: file_id,
            storage_key: key,
            original_name,
            content_type,
            size_bytes,
            uploaded_by: user.user_id,
        })
        .get_result(&mut conn)?;

    info!(file_id = %stored.id, size_bytes, "file uploaded");
    Ok((StatusCode::CREATED, Json(stored.into())))
}

pub async fn file_url(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<FileUrlResponse>> {
    let file = {
        let mut conn = state.db()?;
        Caller::resolve(&mut conn, &user)?;
        stored_files::table
            .find(file_id)
            .first::<StoredFile>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("file"))?
    };

    let mut urls = presigned_urls(&state, std::slice::from_ref(&file)).await?;
    let url = urls
        .remove(&file.id)
        .ok_or_else(|| AppError::internal("presigned url missing"))?;

    Ok(Json(FileUrlResponse {
        id: file.id,
        url,
        expires_in: state.config.file_url_expiry_seconds,
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let file = {
        let mut conn = state.db()?;
        conn.transaction::<StoredFile, AppError, _>(|conn| {
            let caller = Caller::resolve(conn, &user)?;
            let file: StoredFile = stored_files::table
                .find(file_id)
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::entity_not_found("file"))?;
            if !(caller.is_admin() || file.uploaded_by == caller.id) {
                return Err(AppError::forbidden());
            }
            diesel::delete(stored_files::table.find(file_id)).execute(conn)?;
            Ok(file)
        })?
    };

    // The row is gone either way; a dangling blob is only logged.
    if let Err(err) = state.storage.delete_object(&file.storage_key).await {
        warn!(error = %err, key = %file.storage_key, "failed to delete stored object");
    }

    info!(file_id = %file_id, "file deleted");
    Ok(StatusCode::NO_CONTENT)
}
