//! `GET /files/recordings/{filename}` and `GET /files/snapshots/{filename}`:
//! streams a cataloged file with a `Content-Disposition: attachment` header.
//! Path traversal and unknown files are rejected by [`crate::storage::join_checked`]
//! and surfaced through [`AppError`]'s `IntoResponse` impl (400 / 404).

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::join_checked;

pub async fn download_recording(State(state): State<Arc<AppState>>, AxumPath(filename): AxumPath<String>) -> Result<Response> {
    let dir = state.config.get().storage.recordings_dir.clone();
    serve_file(Path::new(&dir), &filename).await
}

pub async fn download_snapshot(State(state): State<Arc<AppState>>, AxumPath(filename): AxumPath<String>) -> Result<Response> {
    let dir = state.config.get().storage.snapshots_dir.clone();
    serve_file(Path::new(&dir), &filename).await
}

async fn serve_file(dir: &Path, filename: &str) -> Result<Response> {
    let path = join_checked(dir, filename)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound(format!("file not found: {filename}")))?;
    let metadata = file.metadata().await?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(response.into_response())
}
