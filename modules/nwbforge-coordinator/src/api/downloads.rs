//! Download endpoints for produced artifacts. Filenames are validated
//! against traversal before any filesystem access, then the resolved path
//! is re-checked against the output base.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use nwbforge_common::NwbforgeError;

use crate::api::error_response;
use crate::app::AppState;

const NWB_SUBDIR: &str = "nwb_files";
const REPORT_SUBDIR: &str = "reports";

/// Resolve `<base>/<subdir>/<filename>` defensively. String checks reject
/// traversal without touching the filesystem; canonicalization then catches
/// anything the string checks missed (symlinks, prefix tricks).
fn resolve_download_path(
    base: &FsPath,
    subdir: &str,
    filename: &str,
) -> Result<PathBuf, NwbforgeError> {
    if filename.contains("..") || filename.starts_with('/') || filename.contains('\\') {
        return Err(NwbforgeError::Validation(
            "Invalid filename: directory traversal not allowed".to_string(),
        ));
    }

    let dir = base.join(subdir);
    let candidate = dir.join(filename);

    let resolved = candidate
        .canonicalize()
        .map_err(|_| NwbforgeError::NotFound(format!("File not found: {filename}")))?;
    let resolved_dir = dir
        .canonicalize()
        .map_err(|_| NwbforgeError::NotFound(format!("File not found: {filename}")))?;

    if !resolved.starts_with(&resolved_dir) {
        return Err(NwbforgeError::Validation(
            "Invalid file path: attempted directory traversal".to_string(),
        ));
    }
    if !resolved.is_file() {
        return Err(NwbforgeError::Validation(format!(
            "Path is not a file: {filename}"
        )));
    }
    Ok(resolved)
}

async fn serve_file(path: &FsPath, filename: &str, media_type: &str) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            info!(path = %path.display(), "serving download");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, media_type.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read download");
            error_response(NwbforgeError::Storage(format!(
                "Failed to serve file: {filename}"
            )))
        }
    }
}

pub async fn download_nwb(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let base = FsPath::new(&state.config.output_base_path);
    match resolve_download_path(base, NWB_SUBDIR, &filename) {
        Ok(path) => serve_file(&path, &filename, "application/octet-stream").await,
        Err(e) => error_response(e),
    }
}

pub async fn download_report(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let media_type = if filename.ends_with(".html") {
        "text/html"
    } else if filename.ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/json"
    };

    let base = FsPath::new(&state.config.output_base_path);
    match resolve_download_path(base, REPORT_SUBDIR, &filename) {
        Ok(path) => serve_file(&path, &filename, media_type).await,
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn output_base() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(NWB_SUBDIR)).unwrap();
        fs::create_dir_all(dir.path().join(REPORT_SUBDIR)).unwrap();
        fs::write(dir.path().join(NWB_SUBDIR).join("session_1.nwb"), b"nwb-bytes").unwrap();
        fs::write(dir.path().join("secret.txt"), b"do not serve").unwrap();
        dir
    }

    #[test]
    fn plain_filename_resolves() {
        let base = output_base();
        let path = resolve_download_path(base.path(), NWB_SUBDIR, "session_1.nwb").unwrap();
        assert!(path.ends_with("session_1.nwb"));
    }

    #[test]
    fn dotdot_is_rejected_before_filesystem_access() {
        // The guard fires even when the base directory does not exist, which
        // proves no filesystem call happened first.
        let err = resolve_download_path(
            FsPath::new("/nonexistent-base"),
            NWB_SUBDIR,
            "../secret.txt",
        )
        .unwrap_err();
        assert!(matches!(err, NwbforgeError::Validation(_)));
    }

    #[test]
    fn absolute_and_backslash_filenames_are_rejected() {
        let base = output_base();
        for filename in ["/etc/passwd", "a\\b.nwb"] {
            let err = resolve_download_path(base.path(), NWB_SUBDIR, filename).unwrap_err();
            assert!(matches!(err, NwbforgeError::Validation(_)), "{filename} should be rejected");
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let base = output_base();
        let err = resolve_download_path(base.path(), NWB_SUBDIR, "absent.nwb").unwrap_err();
        assert!(matches!(err, NwbforgeError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_base_is_rejected() {
        let base = output_base();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("leak.nwb"), b"outside").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("leak.nwb"),
            base.path().join(NWB_SUBDIR).join("link.nwb"),
        )
        .unwrap();

        let err = resolve_download_path(base.path(), NWB_SUBDIR, "link.nwb").unwrap_err();
        assert!(matches!(err, NwbforgeError::Validation(_)));
    }
}
