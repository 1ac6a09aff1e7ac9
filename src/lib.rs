//! Calibre Uploadr Library
//!
//! Uploads an ebook and its metadata to a library service using the same
//! three-step protocol as the Calibre plugin.
//!
//! # Features
//!
//! - **Plugin-Compatible Digests**: file and metadata SHA-256 digests computed
//!   byte-for-byte like the plugin
//! - **Three-Step Handshake**: init, pre-signed object store POST, finalize
//! - **Streaming**: book and cover files are hashed and uploaded without
//!   loading them into memory
//! - **Classified Errors**: every failure names its stage, status and the
//!   server's message
//!
//! # Example
//!
//! ```no_run
//! use calibre_uploadr::auth::ApiKey;
//! use calibre_uploadr::client::{LibraryClient, LibraryClientConfig, DEFAULT_API_BASE};
//! use calibre_uploadr::metadata::BookMetadata;
//! use calibre_uploadr::upload::object_store::ObjectStoreUploader;
//! use calibre_uploadr::upload::pipeline::{UploadPipeline, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let key = ApiKey::new(std::env::var("BF_API_KEY")?)?;
//!     let library = LibraryClient::new(LibraryClientConfig::new(DEFAULT_API_BASE, key))?;
//!     let store = ObjectStoreUploader::new(None)?;
//!
//!     let mut pipeline = UploadPipeline::new(library, store);
//!     let receipt = pipeline
//!         .run(&UploadRequest::new("dune.epub", BookMetadata::with_title("Dune")))
//!         .await?;
//!     println!("{:?}", receipt.book_id);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod digest;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use metadata::{BookMetadata, SeriesEntry};
pub use upload::pipeline::{PipelineState, UploadPipeline, UploadRequest};
pub use upload::{ErrorKind, PipelineError, Stage, UploadError, UploadReceipt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
