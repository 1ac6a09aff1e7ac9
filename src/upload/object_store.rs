//! Object store uploader
//!
//! Pushes the book file to the pre-signed POST destination returned by the
//! init call. The store only acknowledges a completed upload with
//! `204 No Content`; every other status is a failure.
//!
//! # Example
//!
//! ```no_run
//! use calibre_uploadr::upload::object_store::ObjectStoreUploader;
//! use calibre_uploadr::upload::{ObjectStore, UploadSession};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let uploader = ObjectStoreUploader::new(None)?;
//! let session = UploadSession {
//!     target_url: "https://bucket.s3.amazonaws.com/".into(),
//!     form_fields: vec![("key".into(), "uploads/dune.epub".into())],
//!     storage_key: "uploads/dune.epub".into(),
//! };
//! uploader.upload_file(&session, Path::new("dune.epub")).await?;
//! # Ok(())
//! # }
//! ```

use super::{ObjectStore, UploadError, UploadSession, MAX_ERROR_BODY_CHARS};
use crate::metrics;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::Path;
use std::time::{Duration, Instant};

/// Form field name the object store expects the file under
pub const FILE_FIELD: &str = "file";

/// MIME type for a path, from its extension
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Build a streamed multipart part for a local file.
///
/// The part carries the file name and the extension-derived content type,
/// and a known length so the form can be sent with `Content-Length`.
pub(crate) async fn file_part(path: &Path) -> Result<Part, UploadError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::io(path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| UploadError::io(path, e))?
        .len();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    Part::stream_with_length(file, len)
        .file_name(file_name)
        .mime_str(&content_type_for(path))
        .map_err(|e| UploadError::protocol(format!("invalid content type: {}", e)))
}

/// Object store uploader
///
/// Sends no credentials of its own: the pre-signed form fields carry the
/// authorization.
pub struct ObjectStoreUploader {
    http_client: reqwest::Client,
}

impl ObjectStoreUploader {
    /// Create a new uploader with its own HTTP client
    pub fn new(timeout: Option<Duration>) -> Result<Self, UploadError> {
        let http_client = crate::client::http_client(timeout, None).map_err(UploadError::Network)?;
        Ok(Self { http_client })
    }

    /// Create an uploader sharing an existing HTTP client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreUploader {
    #[tracing::instrument(
        name = "object_store.upload",
        skip(self, session),
        fields(
            http.method = "POST",
            upload.storage_key = %session.storage_key,
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_file(&self, session: &UploadSession, path: &Path) -> Result<(), UploadError> {
        let start_time = Instant::now();

        let mut form = Form::new();
        for (name, value) in &session.form_fields {
            form = form.text(name.clone(), value.clone());
        }

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::io(path, e))?
            .len();
        form = form.part(FILE_FIELD, file_part(path).await?);

        let span = tracing::Span::current();
        span.record("upload.bytes", size);

        let response = self
            .http_client
            .post(&session.target_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        span.record("http.status_code", status.as_u16());

        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::error!(
                status = status.as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "Object store rejected upload"
            );

            let message = format!("object store upload failed: {}", excerpt);
            return Err(if status.is_server_error() {
                UploadError::Server {
                    status: status.as_u16(),
                    message,
                }
            } else {
                UploadError::Protocol {
                    status: Some(status.as_u16()),
                    message,
                }
            });
        }

        metrics::record_upload_bytes(size);
        tracing::info!(
            bytes = size,
            duration_ms = start_time.elapsed().as_millis(),
            "Object store upload completed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_known_extensions() {
        assert_eq!(content_type_for(Path::new("dune.epub")), "application/epub+zip");
        assert_eq!(content_type_for(Path::new("dune.pdf")), "application/pdf");
        assert_eq!(content_type_for(Path::new("cover.jpg")), "image/jpeg");
    }

    #[test]
    fn test_content_type_for_unknown_extension() {
        assert_eq!(
            content_type_for(Path::new("book.unknownext")),
            "application/octet-stream"
        );
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_file_part_missing_file() {
        let result = file_part(Path::new("/nonexistent/book.epub")).await;
        assert!(matches!(result, Err(UploadError::Io { .. })));
    }
}
