//! Media upload endpoint.
//!
//! Accepts a multipart form with one `file` field, validates it, and stores
//! it under `UPLOAD_DIR` as `<uuid>.<extension>`. The client's filename is
//! never used on disk.

use std::io::Cursor;

use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use feedfinder::upload::{FileValidationError, storage_name, validate_upload};
use serde::Serialize;

use super::{
    AppState,
    error::ApiError,
    middleware::{AuthenticatedUser, Client},
    request_id::RequestId,
};
use crate::logging::{SecurityEvent, log_security_event};
use crate::metrics;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct StoredUpload {
    pub success: bool,
    pub stored_as: String,
    pub original_name: String,
    pub extension: String,
    pub mime_type: String,
    pub size: usize,
}

/// Validate and store an uploaded image or video.
///
/// # Errors
///
/// - `400 FILE_VALIDATION_FAILED` with a `reason`: bad name, extension, type or content
/// - `400 BAD_REQUEST`: no `file` field, or a malformed form
/// - `413`: body larger than `UPLOAD_MAX_BYTES`
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Client(client): Client,
    request_id: RequestId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StoredUpload>), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let validated = match validate_upload(
            &filename,
            content_type.as_deref(),
            &mut Cursor::new(&bytes),
        ) {
            Ok(validated) => validated,
            Err(err) => {
                metrics::uploads_total(err.reason());
                log_security_event(
                    SecurityEvent::UploadRejected,
                    Some(auth.user_id),
                    Some(&client.ip_address),
                    &format!("Rejected upload '{filename}': {err}"),
                );
                return Err(err.into());
            }
        };

        let stored_as = storage_name(&validated);
        let dir = &state.settings.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(FileValidationError::from)?;
        tokio::fs::write(dir.join(&stored_as), &bytes)
            .await
            .map_err(FileValidationError::from)?;

        metrics::uploads_total("accepted");
        tracing::info!(
            request_id = %request_id.as_str(),
            user_id = auth.user_id,
            stored_as = %stored_as,
            size = bytes.len(),
            "Upload stored"
        );

        return Ok((
            StatusCode::CREATED,
            Json(StoredUpload {
                success: true,
                stored_as,
                original_name: validated.sanitized_name,
                extension: validated.extension,
                mime_type: validated.mime_type,
                size: bytes.len(),
            }),
        ));
    }

    Err(ApiError::bad_request("No file provided"))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::Request {
        status: err.status(),
        message: err.body_text(),
    }
}
