//! Admin image upload: every file is transcoded to a size-bounded WebP,
//! given a fresh key and written to the object store.

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tourbook_media::{allocate_key, replace_extension, sanitize_folder};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::AdminSession;
use crate::error::ServerError;

/// Upper bound on files in one request, used to size the body limit.
pub const MAX_FILES_PER_REQUEST: usize = 20;

#[derive(Debug)]
struct IncomingFile {
    name: String,
    media_type: String,
    data: Bytes,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct UploadResponse {
    pub urls: Vec<String>,
    pub keys: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

fn is_file_field(name: &str) -> bool {
    matches!(name, "files" | "files[]" | "file")
}

/// Read a field, returning `None` once it grows past `max` bytes. The rest
/// of an oversized field is drained so the next field can be read.
async fn read_limited(mut field: Field<'_>, max: usize) -> Result<Option<Bytes>, ServerError> {
    let mut buf = BytesMut::new();
    let mut oversized = false;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?
    {
        if oversized {
            continue;
        }
        if buf.len() + chunk.len() > max {
            oversized = true;
            buf.clear();
            continue;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((!oversized).then(|| buf.freeze()))
}

pub async fn upload_images(
    State(state): State<AppState>,
    _admin: AdminSession,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let max = state.config.max_upload_size;
    let mut folder = String::new();
    let mut files = Vec::new();
    let mut response = UploadResponse::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name == "folder" {
            folder = field
                .text()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Failed to read folder: {e}")))?;
            continue;
        }
        if !is_file_field(&field_name) {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let media_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        match read_limited(field, max).await? {
            Some(data) => files.push(IncomingFile { name, media_type, data }),
            None => {
                warn!(name = %name, max, "Skipped oversized file");
                response.skipped.push(SkippedFile {
                    name,
                    reason: format!("File too large (max {max} bytes)"),
                });
            }
        }
    }

    if files.is_empty() && response.skipped.is_empty() {
        return Ok(Json(response));
    }

    let folder = sanitize_folder(&folder);
    for file in files {
        let transcoder = state.transcoder.clone();
        let IncomingFile { name, media_type, data } = file;
        let (name, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = transcoder.transcode(&data, &name, &media_type);
            (name, outcome)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Transcode task failed: {e}")))?;

        let transcoded = match outcome {
            Ok(t) => t,
            Err(e) => {
                if e.is_skippable() {
                    debug!(name = %name, reason = %e, "Skipped non-image file");
                } else {
                    warn!(name = %name, error = %e, "Failed to transcode upload");
                }
                response.skipped.push(SkippedFile { name, reason: e.to_string() });
                continue;
            }
        };

        let key = replace_extension(&allocate_key(&name, &folder), transcoded.extension());
        let media_type = transcoded.media_type();
        match state.objects.put(transcoded.bytes, &key, media_type).await {
            Ok(url) => {
                response.urls.push(url);
                response.keys.push(key);
            }
            Err(e) => {
                warn!(name = %name, key = %key, error = %e, "Failed to store upload");
                response.skipped.push(SkippedFile {
                    name,
                    reason: "Storage error".to_string(),
                });
            }
        }
    }

    if response.keys.is_empty() {
        return Err(ServerError::Failed("No files uploaded".to_string()));
    }

    info!(
        folder = %folder,
        stored = response.keys.len(),
        skipped = response.skipped.len(),
        "Upload processed"
    );
    Ok(Json(response))
}
