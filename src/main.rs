//! Calibre Uploadr - upload an ebook to a library service like the Calibre plugin
//!
//! Flow: /uploads/init -> object store POST -> /uploads/finalize

use anyhow::Context;
use calibre_uploadr::auth::{ApiKey, CredentialSources};
use calibre_uploadr::client::{http_client, LibraryClient, LibraryClientConfig};
use calibre_uploadr::config::{is_valid_http_url, ConfigLoader};
use calibre_uploadr::metadata::{parse_issued_on, split_tags, BookMetadata, SeriesEntry};
use calibre_uploadr::upload::object_store::ObjectStoreUploader;
use calibre_uploadr::upload::pipeline::{UploadPipeline, UploadRequest};
use calibre_uploadr::{logging, metrics, PipelineError};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Upload a file to BookFusion like the Calibre plugin
#[derive(Parser, Debug)]
#[command(name = "calibre-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to book file (.pdf/.epub/.mobi/.azw3)
    file: PathBuf,

    /// Library API key. If omitted, reads --api-key-file, BF_API_KEY, API_KEY or the config file
    #[arg(long)]
    api_key: Option<String>,

    /// File containing the API key (first line)
    #[arg(long)]
    api_key_file: Option<PathBuf>,

    /// API base URL (default: config file, then the public service)
    #[arg(long)]
    api_base: Option<String>,

    /// Path to an optional YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Title (default: filename stem)
    #[arg(long)]
    title: Option<String>,

    /// Description/summary
    #[arg(long)]
    summary: Option<String>,

    /// Language code (e.g., eng)
    #[arg(long)]
    lang: Option<String>,

    /// ISBN
    #[arg(long)]
    isbn: Option<String>,

    /// Publication date YYYY-MM-DD
    #[arg(long)]
    issued_on: Option<String>,

    /// Repeatable. Example: 'My Series:1' or 'My Series'
    #[arg(long, value_name = "TITLE[:INDEX]")]
    series: Vec<String>,

    /// Repeatable
    #[arg(long = "author")]
    authors: Vec<String>,

    /// Repeatable; comma-separated values are split
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Repeatable. If any provided, the bookshelves array is sent
    #[arg(long = "shelf")]
    shelves: Vec<String>,

    /// Path to cover image to attach
    #[arg(long)]
    cover: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Verbose logs (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Print Prometheus metrics to stderr when done
    #[arg(long)]
    metrics: bool,
}

/// Exit code for upload failures and missing input files
const EXIT_FAILURE: u8 = 1;

/// Exit code for missing credentials or invalid arguments
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = ConfigLoader::load_optional(args.config.as_deref())
        .context("Failed to load configuration")?;

    if args.verbose {
        config.logging.level = "debug".into();
    } else if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if let Some(base) = &args.api_base {
        if !is_valid_http_url(base) {
            anyhow::bail!("Invalid --api-base '{}': must start with http:// or https://", base);
        }
        config.api.base_url = base.clone();
    }
    if let Some(timeout) = args.timeout {
        config.api.timeout_seconds = timeout;
    }
    config.validate().context("Invalid configuration")?;

    logging::init_subscriber(&config.logging)?;
    info!("Starting Calibre Uploadr v{}", calibre_uploadr::VERSION);

    let path = match std::fs::canonicalize(&args.file) {
        Ok(path) if path.is_file() => path,
        _ => {
            eprintln!("File not found: {}", args.file.display());
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };

    if let Some(cover) = &args.cover {
        if !cover.is_file() {
            eprintln!("Cover not found: {}", cover.display());
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    }

    let api_key = ApiKey::resolve(&CredentialSources {
        explicit: args.api_key.clone(),
        key_file: args.api_key_file.clone(),
        config: config.api.api_key.clone(),
    })?;

    let metadata = build_metadata(&args, &path)?;
    info!(
        file = %path.display(),
        size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
        "Uploading"
    );

    let timeout = config.api.timeout();
    let library = LibraryClient::new(LibraryClientConfig {
        base_url: config.api.base_url.clone(),
        api_key,
        timeout: Some(timeout),
        user_agent: config.api.user_agent.clone(),
    })?;
    let store = ObjectStoreUploader::with_client(http_client(
        Some(timeout),
        config.api.user_agent.as_deref(),
    )?);

    let mut request = UploadRequest::new(path, metadata);
    request.cover = args.cover.clone();

    let mut pipeline = UploadPipeline::new(library, store);
    let result = pipeline.run(&request).await;

    if args.metrics {
        eprint!("{}", metrics::render());
    }

    match result {
        Ok(receipt) => {
            let output = serde_json::json!({
                "ok": true,
                "bookfusion_id": receipt.book_id,
                "key": receipt.storage_key,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report_failure(&e);
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}

/// Assemble metadata from the command line
fn build_metadata(args: &Args, path: &std::path::Path) -> anyhow::Result<BookMetadata> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

    let title = non_empty(&args.title).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let issued_on = match non_empty(&args.issued_on) {
        Some(raw) => Some(parse_issued_on(&raw)?),
        None => None,
    };

    let series = args
        .series
        .iter()
        .map(|s| SeriesEntry::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BookMetadata {
        title: Some(title),
        summary: non_empty(&args.summary),
        language: non_empty(&args.lang),
        isbn: non_empty(&args.isbn),
        issued_on,
        series,
        authors: args.authors.clone(),
        tags: split_tags(&args.tags),
        // Only send bookshelves if the user provided any
        bookshelves: if args.shelves.is_empty() {
            None
        } else {
            Some(args.shelves.clone())
        },
    })
}

fn report_failure(e: &PipelineError) {
    eprintln!("Upload failed.");
    eprintln!("Stage: {}", e.stage);
    eprintln!("Error: {}", e.kind());
    if let Some(status) = e.error.status() {
        eprintln!("HTTP {}", status);
    }
    match e.error.server_message() {
        Some(message) => eprintln!("{}", message),
        None => eprintln!("{}", e.error),
    }
}
