//! Upload pipeline
//!
//! Sequences one upload end to end:
//!
//! ```text
//! Idle -> DigestingFile -> Initiating -> Uploading -> DigestingMetadata -> Finalizing -> Done
//!              \               \             \                \                 \
//!               +---------------+-------------+----------------+-----------------+--> Failed
//! ```
//!
//! Every step needs the previous step's output, so nothing runs in parallel.
//! A failure stops the run where it happened; nothing is rolled back, and
//! orphaned sessions are left for the service to collect.
//!
//! # Example
//!
//! ```no_run
//! use calibre_uploadr::auth::ApiKey;
//! use calibre_uploadr::client::{LibraryClient, LibraryClientConfig};
//! use calibre_uploadr::metadata::BookMetadata;
//! use calibre_uploadr::upload::object_store::ObjectStoreUploader;
//! use calibre_uploadr::upload::pipeline::{UploadPipeline, UploadRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let library = LibraryClient::new(LibraryClientConfig::new(
//!     "https://www.bookfusion.com/calibre-api/v1",
//!     ApiKey::new("my-key")?,
//! ))?;
//! let store = ObjectStoreUploader::new(None)?;
//!
//! let mut pipeline = UploadPipeline::new(library, store);
//! let request = UploadRequest::new("dune.epub", BookMetadata::with_title("Dune"));
//! let receipt = pipeline.run(&request).await?;
//! println!("Book id: {:?}", receipt.book_id);
//! # Ok(())
//! # }
//! ```

use super::{
    ErrorKind, LibraryService, ObjectStore, PipelineError, Stage, UploadError, UploadReceipt,
    UploadResult,
};
use crate::client::FinalizeSubmission;
use crate::digest;
use crate::metadata::BookMetadata;
use crate::metrics;
use std::path::PathBuf;
use std::time::Instant;

/// Input of one upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Book file to upload
    pub file: PathBuf,
    pub metadata: BookMetadata,
    /// Optional cover image, sent to finalize and folded into the metadata digest
    pub cover: Option<PathBuf>,
}

impl UploadRequest {
    pub fn new(file: impl Into<PathBuf>, metadata: BookMetadata) -> Self {
        Self {
            file: file.into(),
            metadata,
            cover: None,
        }
    }

    pub fn with_cover(mut self, cover: impl Into<PathBuf>) -> Self {
        self.cover = Some(cover.into());
        self
    }

    /// File name sent to init
    pub fn filename(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }
}

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    DigestingFile,
    Initiating,
    Uploading,
    DigestingMetadata,
    Finalizing,
    Done(UploadReceipt),
    Failed { stage: Stage, kind: ErrorKind },
}

impl PipelineState {
    fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::DigestingFile => PipelineState::DigestingFile,
            Stage::Initiating => PipelineState::Initiating,
            Stage::Uploading => PipelineState::Uploading,
            Stage::DigestingMetadata => PipelineState::DigestingMetadata,
            Stage::Finalizing => PipelineState::Finalizing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done(_) | PipelineState::Failed { .. })
    }
}

/// Upload pipeline over a library service and an object store
pub struct UploadPipeline<L, O> {
    library: L,
    store: O,
    state: PipelineState,
}

impl<L: LibraryService, O: ObjectStore> UploadPipeline<L, O> {
    pub fn new(library: L, store: O) -> Self {
        Self {
            library,
            store,
            state: PipelineState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    /// Run one upload. Each call starts again from `Idle`.
    #[tracing::instrument(
        name = "pipeline.run",
        skip(self, request),
        fields(
            upload.file = %request.file.display(),
            upload.cover = request.cover.is_some()
        ),
        err
    )]
    pub async fn run(&mut self, request: &UploadRequest) -> UploadResult {
        self.state = PipelineState::Idle;

        let started = self.enter(Stage::DigestingFile);
        let result = digest::file_digest(&request.file);
        let file_digest = self.conclude(Stage::DigestingFile, started, result)?;

        let started = self.enter(Stage::Initiating);
        let result = self
            .library
            .init_upload(&request.filename(), &file_digest)
            .await;
        let session = self.conclude(Stage::Initiating, started, result)?;

        let started = self.enter(Stage::Uploading);
        let result = self.store.upload_file(&session, &request.file).await;
        self.conclude(Stage::Uploading, started, result)?;

        let started = self.enter(Stage::DigestingMetadata);
        let result = digest::metadata_digest(&request.metadata, request.cover.as_deref());
        let metadata_digest = self.conclude(Stage::DigestingMetadata, started, result)?;

        let submission = FinalizeSubmission {
            storage_key: session.storage_key.clone(),
            file_digest: file_digest.clone(),
            metadata: request.metadata.clone(),
            metadata_digest: metadata_digest.clone(),
            cover: request.cover.clone(),
        };

        let started = self.enter(Stage::Finalizing);
        let result = self.library.finalize(&submission).await;
        let outcome = self.conclude(Stage::Finalizing, started, result)?;

        let receipt = UploadReceipt {
            book_id: outcome.book_id,
            storage_key: session.storage_key,
            file_digest,
            metadata_digest,
        };

        metrics::record_upload_success();
        tracing::info!(
            book_id = ?receipt.book_id,
            storage_key = %receipt.storage_key,
            "Upload completed"
        );
        self.state = PipelineState::Done(receipt.clone());
        Ok(receipt)
    }

    fn enter(&mut self, stage: Stage) -> Instant {
        tracing::debug!(stage = %stage, "Entering stage");
        self.state = PipelineState::for_stage(stage);
        Instant::now()
    }

    fn conclude<T>(
        &mut self,
        stage: Stage,
        started: Instant,
        result: Result<T, UploadError>,
    ) -> Result<T, PipelineError> {
        metrics::record_stage_duration(stage.as_str(), started.elapsed().as_secs_f64());

        result.map_err(|error| {
            let kind = error.kind();
            metrics::record_upload_failure(stage.as_str(), kind.as_str());
            tracing::error!(
                stage = %stage,
                kind = %kind,
                status = ?error.status(),
                error = %error,
                "Upload pipeline failed"
            );
            self.state = PipelineState::Failed { stage, kind };
            PipelineError { stage, error }
        })
    }
}
