//! Upload module
//!
//! Error taxonomy shared by every stage, the object store uploader and the
//! pipeline that sequences init, upload and finalize.

use crate::client::{FinalizeOutcome, FinalizeSubmission};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod object_store;
pub mod pipeline;

/// Maximum number of characters of a response body kept in an error message
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Authentication failed{}: {message}", status_suffix(.status))]
    Auth {
        status: Option<u16>,
        message: String,
    },

    #[error("Protocol error{}: {message}", status_suffix(.status))]
    Protocol {
        status: Option<u16>,
        message: String,
    },

    #[error("Validation failed (HTTP {status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

/// Classification of an [`UploadError`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Auth,
    Protocol,
    Validation,
    Server,
    Network,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Auth => "auth",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UploadError {
    /// Wrap an IO error with the path that caused it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a protocol error without a status code
    pub fn protocol(message: impl Into<String>) -> Self {
        UploadError::Protocol {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Io { .. } => ErrorKind::Io,
            UploadError::Auth { .. } => ErrorKind::Auth,
            UploadError::Protocol { .. } => ErrorKind::Protocol,
            UploadError::Validation { .. } => ErrorKind::Validation,
            UploadError::Server { .. } => ErrorKind::Server,
            UploadError::Network(_) => ErrorKind::Network,
        }
    }

    /// HTTP status code, if the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Auth { status, .. } | UploadError::Protocol { status, .. } => *status,
            UploadError::Validation { status, .. } | UploadError::Server { status, .. } => {
                Some(*status)
            }
            UploadError::Network(e) => e.status().map(|s| s.as_u16()),
            UploadError::Io { .. } => None,
        }
    }

    /// Server-provided message, if any
    pub fn server_message(&self) -> Option<&str> {
        match self {
            UploadError::Auth { message, .. }
            | UploadError::Protocol { message, .. }
            | UploadError::Validation { message, .. }
            | UploadError::Server { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            UploadError::protocol(format!("Malformed response body: {}", e))
        } else {
            UploadError::Network(e)
        }
    }
}

/// Pipeline stage names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DigestingFile,
    Initiating,
    Uploading,
    DigestingMetadata,
    Finalizing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DigestingFile => "digest_file",
            Stage::Initiating => "init",
            Stage::Uploading => "upload",
            Stage::DigestingMetadata => "digest_metadata",
            Stage::Finalizing => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an upload pipeline
#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: UploadError,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Session returned by the init call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Pre-signed object store URL
    pub target_url: String,
    /// Form fields the object store requires, in the order received
    pub form_fields: Vec<(String, String)>,
    /// Storage key correlating the session with finalize
    pub storage_key: String,
}

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Server-assigned book id, when the finalize response carries one
    pub book_id: Option<String>,
    pub storage_key: String,
    pub file_digest: String,
    pub metadata_digest: String,
}

/// Terminal outcome of one pipeline run
pub type UploadResult = Result<UploadReceipt, PipelineError>;

/// Library service half of the handshake (init and finalize)
#[async_trait]
pub trait LibraryService: Send + Sync {
    /// Open an upload session for a file with the given digest
    async fn init_upload(&self, filename: &str, file_digest: &str) -> Result<UploadSession, UploadError>;

    /// Commit metadata and digests for an uploaded file
    async fn finalize(&self, submission: &FinalizeSubmission) -> Result<FinalizeOutcome, UploadError>;
}

/// Object store half of the handshake
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Push the file to the session's pre-signed destination
    async fn upload_file(&self, session: &UploadSession, path: &Path) -> Result<(), UploadError>;
}

/// Classify a non-success response from the library API.
///
/// 401/403 map to [`UploadError::Auth`], 5xx to [`UploadError::Server`],
/// other 4xx to `client_error`, and anything else to
/// [`UploadError::Protocol`].
pub(crate) fn classify_status(
    status: u16,
    body: &str,
    client_error: fn(u16, String) -> UploadError,
) -> UploadError {
    let message = server_message(body);
    match status {
        401 | 403 => UploadError::Auth {
            status: Some(status),
            message,
        },
        500..=599 => UploadError::Server { status, message },
        400..=499 => client_error(status, message),
        _ => UploadError::Protocol {
            status: Some(status),
            message,
        },
    }
}

/// Extract a human-readable message from an error response body.
///
/// JSON bodies yield their `error`, `message` or `errors` member; anything
/// else falls back to the trimmed, truncated body text.
pub(crate) fn server_message(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "message", "errors"] {
            match map.get(field) {
                Some(serde_json::Value::String(s)) => return s.clone(),
                Some(serde_json::Value::Array(items)) => {
                    let parts: Vec<String> = items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    return parts.join(", ");
                }
                Some(serde_json::Value::Object(inner)) => {
                    return serde_json::Value::Object(inner.clone()).to_string()
                }
                _ => {}
            }
        }
    }

    truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
