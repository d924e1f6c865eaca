//! HTTP handlers for the HEIC to JPG converter API

use crate::config::ConversionOptions;
use crate::converter::EncodedOutput;
use crate::error::ConvertError;
use crate::job::{JobHandle, ProgressEvent};
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "heic2jpg"
    }))
}

/// Upload fields shared by the one-shot and session endpoints.
struct Upload {
    file: Bytes,
    file_name: Option<String>,
    options: ConversionOptions,
}

/// Read `file`, `quality`, `max_dimension` and `chroma` from a multipart body.
async fn read_upload(state: &AppState, mut multipart: Multipart) -> Result<Upload, ConvertError> {
    let mut file = None;
    let mut file_name = None;
    let mut options = state.config.default_options();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConvertError::InvalidInput(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ConvertError::InvalidInput(e.to_string()))?;
                if data.len() > state.config.max_file_size {
                    return Err(ConvertError::FileTooLarge {
                        size: data.len(),
                        max: state.config.max_file_size,
                    });
                }
                file = Some(data);
            }
            "quality" | "max_dimension" | "chroma" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ConvertError::InvalidInput(e.to_string()))?;
                apply_option(&mut options, &name, text.trim())?;
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ConvertError::InvalidInput("Missing 'file' field".to_string()))?;
    Ok(Upload {
        file,
        file_name,
        options,
    })
}

fn apply_option(options: &mut ConversionOptions, name: &str, value: &str) -> Result<(), ConvertError> {
    let invalid = || ConvertError::InvalidInput(format!("Invalid {name} value '{value}'"));
    match name {
        "quality" => options.quality = value.parse().map_err(|_| invalid())?,
        "max_dimension" if value.is_empty() => options.max_dimension = None,
        "max_dimension" => options.max_dimension = Some(value.parse().map_err(|_| invalid())?),
        "chroma" => options.chroma = value.parse()?,
        _ => {}
    }
    Ok(())
}

/// Download name for the converted file: the upload's name with a `.jpg`
/// extension in place of `.heic`/`.heif`, or a millisecond timestamp.
fn download_name(upload: Option<&str>) -> String {
    let base = upload
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .unwrap_or("");
    let stem = match base.rsplit_once('.') {
        Some((stem, ext))
            if ext.eq_ignore_ascii_case("heic") || ext.eq_ignore_ascii_case("heif") =>
        {
            stem
        }
        _ => base,
    };
    let stem: String = stem
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim().is_empty() {
        format!("{}.jpg", Utc::now().timestamp_millis())
    } else {
        format!("{stem}.jpg")
    }
}

fn jpeg_response(output: EncodedOutput, upload_name: Option<&str>) -> Response {
    let output_name = download_name(upload_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{output_name}\""),
            ),
        ],
        output.into_bytes(),
    )
        .into_response()
}

/// Cancels the job if the request goes away before it finishes.
struct CancelOnDrop(JobHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Convert HEIC to JPG endpoint
///
/// Accepts multipart form data with:
/// - `file`: HEIC/HEIF file (required)
/// - `quality`: JPEG quality 1-100 (optional)
/// - `max_dimension`: longest output edge in pixels (optional)
/// - `chroma`: `420`, `422` or `444` (optional, default 420)
#[instrument(skip(state, multipart))]
pub async fn convert_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ConvertError> {
    let upload = read_upload(&state, multipart).await?;
    info!(
        file_name = ?upload.file_name,
        size = upload.file.len(),
        quality = upload.options.quality,
        "Processing conversion request"
    );

    let session = state.ephemeral_session();
    let job = session.start_conversion(upload.file, upload.options)?;
    let _guard = CancelOnDrop(job.clone());
    let output = job.wait().await?;

    info!(size = output.len(), width = output.width(), height = output.height(), "Conversion complete");
    Ok(jpeg_response(output, upload.file_name.as_deref()))
}

#[derive(Serialize)]
struct JobStatus {
    session: Uuid,
    job: Uuid,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    progress: ProgressEvent,
}

impl JobStatus {
    fn new(session: Uuid, job: &JobHandle) -> Self {
        Self {
            session,
            job: job.id(),
            created_at: job.created_at(),
            progress: job.snapshot(),
        }
    }
}

fn not_found(id: Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": format!("No conversion in session {id}"),
            "kind": "not_found"
        })),
    )
        .into_response()
}

/// Start a conversion in session `id`, replacing any conversion already running there.
#[instrument(skip(state, multipart))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, ConvertError> {
    let upload = read_upload(&state, multipart).await?;
    let session = state.session_or_create(id)?;
    let job = session.start_conversion(upload.file, upload.options)?;
    info!(job = %job.id(), file_name = ?upload.file_name, "Conversion started");
    session.set_upload_name(upload.file_name);
    Ok((StatusCode::ACCEPTED, Json(JobStatus::new(id, &job))).into_response())
}

/// Current `{state, percent}` of the session's conversion.
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.session(id).and_then(|s| s.current()) {
        Some(job) => Json(JobStatus::new(id, &job)).into_response(),
        None => not_found(id),
    }
}

/// The finished JPEG; 409 while the conversion is still running.
pub async fn session_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ConvertError> {
    let Some(session) = state.session(id) else {
        return Ok(not_found(id));
    };
    let Some(job) = session.current() else {
        return Ok(not_found(id));
    };
    Ok(jpeg_response(job.get_result()?, session.upload_name().as_deref()))
}

/// Cancel the session's conversion and drop the session.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.remove_session(id) {
        Some(session) => {
            session.discard();
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found(id),
    }
}

/// API description
pub async fn api_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "endpoints": {
            "convert": { "path": "/api/convert", "method": "POST" },
            "start": { "path": "/api/sessions/{id}", "method": "PUT" },
            "status": { "path": "/api/sessions/{id}", "method": "GET" },
            "result": { "path": "/api/sessions/{id}/result", "method": "GET" },
            "discard": { "path": "/api/sessions/{id}", "method": "DELETE" }
        },
        "fields": {
            "file": "HEIC/HEIF file (required)",
            "quality": format!("JPEG quality 1-100 (optional, default {})", state.config.default_quality),
            "max_dimension": "Longest output edge in pixels (optional, never upscales)",
            "chroma": "420, 422 or 444 (optional, default 420)"
        },
        "limits": {
            "max_file_size": format!("{}MB", state.config.max_file_size / 1024 / 1024),
            "max_resolution": format!("{}x{}", state.config.max_resolution, state.config.max_resolution),
            "workers": state.worker_pool.workers(),
            "active_sessions": state.session_count(),
            "max_sessions": state.config.max_sessions
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_name_follows_the_upload() {
        assert_eq!(download_name(Some("IMG_0042.HEIC")), "IMG_0042.jpg");
        assert_eq!(download_name(Some("holiday.heif")), "holiday.jpg");
        assert_eq!(download_name(Some("scan.v2.heic")), "scan.v2.jpg");
        assert_eq!(download_name(Some("notes.txt")), "notes.txt.jpg");
        assert_eq!(download_name(Some("C:\\photos\\beach.heic")), "beach.jpg");
        assert_eq!(download_name(Some("say \"cheese\".heic")), "say _cheese_.jpg");
        assert_eq!(download_name(Some("café.heic")), "caf_.jpg");
    }

    #[test]
    fn download_name_falls_back_to_a_timestamp() {
        for upload in [None, Some(""), Some(".heic"), Some("dir/")] {
            let name = download_name(upload);
            let stem = name.strip_suffix(".jpg").unwrap();
            assert!(stem.parse::<i64>().is_ok(), "{upload:?} gave {name}");
        }
    }
}
