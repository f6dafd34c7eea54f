//! Upload ingestion. Streams the multipart `file` field to a request-scoped
//! transient file and collects the `description` field.

use std::io;
use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;

static NON_WORD_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("static regex is valid"));

const FALLBACK_STEM: &str = "upload";

/// Makes an untrusted client filename safe to use as a path component.
///
/// Only the final path component is kept. Every run of non-word characters in
/// the stem and in the extension becomes `_`; the extension itself survives so
/// extraction can dispatch on it.
pub fn sanitize_filename(original: &str) -> String {
    let base = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let mut stem = NON_WORD_RUN.replace_all(stem, "_").into_owned();
    if stem.is_empty() {
        stem = FALLBACK_STEM.to_string();
    }

    match extension {
        Some(ext) => format!("{stem}.{}", NON_WORD_RUN.replace_all(ext, "_")),
        None => stem,
    }
}

/// A file that lives for one request only.
///
/// Call [`TransientFile::remove`] once the contents have been read. If the guard
/// is dropped first (early error, client disconnect) the file is deleted on drop.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    removed: bool,
}

impl TransientFile {
    /// Creates `<dir>/<uuid>_<sanitized name>` and opens it for writing.
    pub async fn create(dir: &Path, original_name: &str) -> io::Result<(Self, tokio::fs::File)> {
        tokio::fs::create_dir_all(dir).await?;

        let name = format!("{}_{}", Uuid::new_v4().simple(), sanitize_filename(original_name));
        let guard = TransientFile {
            path: dir.join(name),
            removed: false,
        };
        let file = tokio::fs::File::create(&guard.path).await?;
        Ok((guard, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file. Failure is logged and otherwise ignored.
    pub async fn remove(mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed transient file {}", self.path.display()),
            Err(e) => warn!(
                "Failed to remove transient file {}: {e}",
                self.path.display()
            ),
        }
        self.removed = true;
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Blocking unlink on purpose: a spawned task could be lost at shutdown.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed abandoned transient file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove abandoned transient file {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// The two multipart fields the endpoint needs, with the file already on disk.
#[derive(Debug)]
pub struct ReceivedUpload {
    pub file: TransientFile,
    pub original_name: String,
    pub description: String,
}

/// Reads the multipart body: `file` is streamed to disk chunk by chunk,
/// `description` is read as text, anything else is skipped.
pub async fn receive_upload(
    mut multipart: Multipart,
    upload_dir: &Path,
) -> Result<ReceivedUpload, AppError> {
    let mut file: Option<(TransientFile, String)> = None;
    let mut description: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or(FALLBACK_STEM).to_string();
                let transient = save_field(&mut field, upload_dir, &original_name).await?;
                file = Some((transient, original_name));
            }
            Some("description") => {
                description = Some(field.text().await.map_err(malformed)?);
            }
            other => debug!("Ignoring unexpected multipart field {other:?}"),
        }
    }

    let (file, original_name) =
        file.ok_or_else(|| AppError::Validation("Missing required field 'file'".to_string()))?;
    let description = description
        .ok_or_else(|| AppError::Validation("Missing required field 'description'".to_string()))?;

    Ok(ReceivedUpload {
        file,
        original_name,
        description,
    })
}

async fn save_field(
    field: &mut Field<'_>,
    upload_dir: &Path,
    original_name: &str,
) -> Result<TransientFile, AppError> {
    let (transient, mut out) = TransientFile::create(upload_dir, original_name)
        .await
        .map_err(|e| AppError::UploadFailed(e.to_string()))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(upload_read_failed)? {
        out.write_all(&chunk)
            .await
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;
        written += chunk.len() as u64;
    }
    out.flush()
        .await
        .map_err(|e| AppError::UploadFailed(e.to_string()))?;

    debug!(
        "Saved upload '{original_name}' ({written} bytes) to {}",
        transient.path().display()
    );
    Ok(transient)
}

fn malformed(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge;
    }
    AppError::Validation(format!("Malformed multipart body: {}", e.body_text()))
}

fn upload_read_failed(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge;
    }
    AppError::UploadFailed(e.body_text())
}
