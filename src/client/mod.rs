//! Library API client
//!
//! Talks to the two library-service endpoints of the upload handshake:
//!
//! | Call | Endpoint | Span |
//! |------|----------|------|
//! | init | `POST {base}/uploads/init` | `library.init_upload` |
//! | finalize | `POST {base}/uploads/finalize` | `library.finalize` |
//!
//! Both calls send `multipart/form-data` and authenticate with HTTP Basic
//! credentials made of the API key and an empty password.
//!
//! # Example
//!
//! ```no_run
//! use calibre_uploadr::auth::ApiKey;
//! use calibre_uploadr::client::{LibraryClient, LibraryClientConfig};
//! use calibre_uploadr::upload::LibraryService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LibraryClientConfig::new(
//!     "https://www.bookfusion.com/calibre-api/v1",
//!     ApiKey::new("my-key")?,
//! );
//! let client = LibraryClient::new(config)?;
//! let session = client.init_upload("dune.epub", "e3b0c442...").await?;
//! println!("Upload to {}", session.target_url);
//! # Ok(())
//! # }
//! ```

use crate::auth::ApiKey;
use crate::metadata::BookMetadata;
use crate::upload::object_store::file_part;
use crate::upload::{classify_status, LibraryService, UploadError, UploadSession};
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Default library API base URL
pub const DEFAULT_API_BASE: &str = "https://www.bookfusion.com/calibre-api/v1";

/// Default timeout for a single HTTP call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Library client configuration
#[derive(Debug, Clone)]
pub struct LibraryClientConfig {
    /// API base URL, without a trailing `/uploads`
    pub base_url: String,
    pub api_key: ApiKey,
    /// Request timeout (default: 300 seconds)
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl LibraryClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout: None,
            user_agent: None,
        }
    }
}

/// Build the HTTP client shared by the library client and the object store
pub fn http_client(
    timeout: Option<Duration>,
    user_agent: Option<&str>,
) -> Result<reqwest::Client, reqwest::Error> {
    let default_agent = format!("calibre-uploadr/{}", crate::VERSION);
    reqwest::Client::builder()
        .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
        .user_agent(user_agent.unwrap_or(&default_agent))
        .build()
}

/// Everything finalize submits
#[derive(Debug, Clone)]
pub struct FinalizeSubmission {
    pub storage_key: String,
    pub file_digest: String,
    pub metadata: BookMetadata,
    pub metadata_digest: String,
    pub cover: Option<PathBuf>,
}

impl FinalizeSubmission {
    /// Text entries of the finalize form, in wire order.
    ///
    /// The cover part, when present, is appended after these.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let meta = &self.metadata;
        let mut fields: Vec<(String, String)> = vec![
            ("key".into(), self.storage_key.clone()),
            ("digest".into(), self.file_digest.clone()),
            (
                "metadata[calibre_metadata_digest]".into(),
                self.metadata_digest.clone(),
            ),
        ];

        if let Some(title) = &meta.title {
            fields.push(("metadata[title]".into(), title.clone()));
        }

        let scalars = [
            ("metadata[summary]", meta.summary.clone()),
            ("metadata[language]", meta.language.clone()),
            ("metadata[isbn]", meta.isbn.clone()),
            ("metadata[issued_on]", meta.issued_on_text()),
        ];
        for (name, value) in scalars {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                fields.push((name.into(), value));
            }
        }

        for entry in &meta.series {
            fields.push(("metadata[series][][title]".into(), entry.title.clone()));
            if let Some(index) = &entry.index {
                fields.push(("metadata[series][][index]".into(), index.clone()));
            }
        }

        for author in &meta.authors {
            fields.push(("metadata[author_list][]".into(), author.clone()));
        }
        for tag in &meta.tags {
            fields.push(("metadata[tag_list][]".into(), tag.clone()));
        }

        if let Some(shelves) = &meta.bookshelves {
            // Leading empty entry keeps the field an array server-side
            fields.push(("metadata[bookshelves][]".into(), String::new()));
            for shelf in shelves {
                fields.push(("metadata[bookshelves][]".into(), shelf.clone()));
            }
        }

        fields
    }
}

/// Successful finalize response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Server-assigned book id
    pub book_id: Option<String>,
    /// `x-request-id` response header
    pub request_id: Option<String>,
}

/// Library API client
pub struct LibraryClient {
    config: LibraryClientConfig,
    http_client: reqwest::Client,
}

impl LibraryClient {
    /// Create a new library client
    pub fn new(config: LibraryClientConfig) -> Result<Self, UploadError> {
        let http_client = http_client(config.timeout, config.user_agent.as_deref())
            .map_err(UploadError::Network)?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(self.config.api_key.expose(), Some(""))
    }
}

#[async_trait]
impl LibraryService for LibraryClient {
    #[tracing::instrument(
        name = "library.init_upload",
        skip(self, file_digest),
        fields(
            http.method = "POST",
            http.status_code = tracing::field::Empty,
            upload.storage_key = tracing::field::Empty
        ),
        err
    )]
    async fn init_upload(&self, filename: &str, file_digest: &str) -> Result<UploadSession, UploadError> {
        let url = self.endpoint("uploads/init");
        let form = Form::new()
            .text("filename", filename.to_string())
            .text("digest", file_digest.to_string());

        tracing::debug!(url = %url, "Sending init request");
        let response = self
            .authorized(self.http_client.post(&url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let span = tracing::Span::current();
        span.record("http.status_code", status.as_u16());

        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, |status, message| {
                UploadError::Protocol {
                    status: Some(status),
                    message,
                }
            }));
        }

        let session = parse_init_response(&body)?;
        span.record("upload.storage_key", session.storage_key.as_str());
        tracing::info!(
            storage_key = %session.storage_key,
            fields = session.form_fields.len(),
            "Upload session initialized"
        );
        Ok(session)
    }

    #[tracing::instrument(
        name = "library.finalize",
        skip(self, submission),
        fields(
            http.method = "POST",
            upload.storage_key = %submission.storage_key,
            http.status_code = tracing::field::Empty,
            library.book_id = tracing::field::Empty
        ),
        err
    )]
    async fn finalize(&self, submission: &FinalizeSubmission) -> Result<FinalizeOutcome, UploadError> {
        let url = self.endpoint("uploads/finalize");

        let mut form = Form::new();
        for (name, value) in submission.form_fields() {
            form = form.text(name, value);
        }
        if let Some(cover) = &submission.cover {
            form = form.part("metadata[cover]", file_part(cover).await?);
        }

        tracing::debug!(url = %url, "Sending finalize request");
        let response = self
            .authorized(self.http_client.post(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let span = tracing::Span::current();
        span.record("http.status_code", status.as_u16());
        if let Some(rid) = &request_id {
            tracing::debug!(request_id = %rid, "Finalize response received");
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, |status, message| {
                UploadError::Validation { status, message }
            }));
        }

        let book_id = parse_book_id(&body);
        match &book_id {
            Some(id) => {
                span.record("library.book_id", id.as_str());
            }
            None => tracing::warn!(
                status = status.as_u16(),
                "Finalize succeeded without a book id in the response"
            ),
        }

        Ok(FinalizeOutcome {
            book_id,
            request_id,
        })
    }
}

/// Parse the init response body into an [`UploadSession`]
pub fn parse_init_response(body: &str) -> Result<UploadSession, UploadError> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| UploadError::protocol(format!("init response is not JSON: {}", e)))?;

    let target_url = data
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| UploadError::protocol(format!("init response missing 'url': {}", data)))?;

    let params = data
        .get("params")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            UploadError::protocol(format!("init response missing 'params': {}", data))
        })?;

    let storage_key = params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| UploadError::protocol("init response params missing 'key'"))?;

    let form_fields = params
        .iter()
        .map(|(name, value)| (name.clone(), form_value(value)))
        .collect();

    Ok(UploadSession {
        target_url: target_url.to_string(),
        form_fields,
        storage_key: storage_key.to_string(),
    })
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_book_id(body: &str) -> Option<String> {
    let data: Value = serde_json::from_str(body).ok()?;
    match data.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
