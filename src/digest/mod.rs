//! Digest engine
//!
//! Computes the two SHA-256 digests the library service verifies:
//!
//! - the **file digest**, over the raw bytes of the uploaded book
//! - the **metadata digest**, over a fixed concatenation of metadata fields
//!   and the optional cover, byte-identical to the Calibre plugin
//!
//! # Metadata digest input
//!
//! Fields are written back to back with no separators, each only when
//! present:
//!
//! ```text
//! title | summary | language | isbn | issued_on (YYYY-MM-DD)
//! for each series:     title | index
//! for each author:     author
//! for each tag:        tag
//! if bookshelves set:  shelf...   (a present but empty list writes 0x00)
//! if cover:            0x00 * len(cover) | 0x00 | cover bytes
//! ```
//!
//! All output is lowercase hex.
//!
//! # Example
//!
//! ```no_run
//! use calibre_uploadr::digest::{file_digest, metadata_digest};
//! use calibre_uploadr::metadata::BookMetadata;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = file_digest(Path::new("dune.epub"))?;
//! let meta = metadata_digest(&BookMetadata::with_title("Dune"), None)?;
//! println!("{} {}", file, meta);
//! # Ok(())
//! # }
//! ```

use crate::metadata::BookMetadata;
use crate::upload::UploadError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Read size for book files (1 MiB)
pub const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// Read size for cover images (64 KiB)
pub const COVER_CHUNK_SIZE: usize = 64 * 1024;

/// Marker written for a bookshelves field that is present but empty
const EMPTY_SHELVES_MARKER: &[u8] = &[0x00];

/// SHA-256 of a file's bytes, streamed in [`FILE_CHUNK_SIZE`] chunks
#[tracing::instrument(name = "digest.file", skip_all, fields(path = %path.display()), err)]
pub fn file_digest(path: &Path) -> Result<String, UploadError> {
    let mut file = File::open(path).map_err(|e| UploadError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(UploadError::io(path, e)),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    let digest = hex::encode(hasher.finalize());
    tracing::debug!(bytes = total, sha256 = %digest, "File digest computed");
    Ok(digest)
}

/// Write the metadata part of the digest input (everything except the cover)
pub fn write_digest_input<W: Write>(metadata: &BookMetadata, out: &mut W) -> io::Result<()> {
    let scalars = [
        metadata.title.as_deref(),
        metadata.summary.as_deref(),
        metadata.language.as_deref(),
        metadata.isbn.as_deref(),
    ];
    for value in scalars.into_iter().flatten() {
        out.write_all(value.as_bytes())?;
    }
    if let Some(issued_on) = metadata.issued_on_text() {
        out.write_all(issued_on.as_bytes())?;
    }

    for entry in &metadata.series {
        out.write_all(entry.title.as_bytes())?;
        if let Some(index) = &entry.index {
            out.write_all(index.as_bytes())?;
        }
    }

    for author in &metadata.authors {
        out.write_all(author.as_bytes())?;
    }
    for tag in &metadata.tags {
        out.write_all(tag.as_bytes())?;
    }

    if let Some(shelves) = &metadata.bookshelves {
        if shelves.is_empty() {
            out.write_all(EMPTY_SHELVES_MARKER)?;
        }
        for shelf in shelves {
            out.write_all(shelf.as_bytes())?;
        }
    }

    Ok(())
}

/// Write the cover preamble: `size` zero bytes followed by one null byte
fn write_cover_preamble<W: Write>(size: u64, out: &mut W) -> io::Result<()> {
    io::copy(&mut io::repeat(0).take(size), out)?;
    out.write_all(&[0x00])
}

/// Materialize the full digest input for an in-memory cover.
///
/// Only used to inspect the byte layout; uploads stream the input straight
/// into the hasher through [`metadata_digest`].
pub fn digest_input(metadata: &BookMetadata, cover: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writes into a Vec cannot fail
    let _ = write_digest_input(metadata, &mut buf);
    if let Some(cover) = cover {
        let _ = write_cover_preamble(cover.len() as u64, &mut buf);
        buf.extend_from_slice(cover);
    }
    buf
}

/// Metadata digest for an in-memory cover
pub fn metadata_digest_bytes(metadata: &BookMetadata, cover: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    // Sha256's Write impl never fails
    let _ = write_digest_input(metadata, &mut hasher);
    if let Some(cover) = cover {
        let _ = write_cover_preamble(cover.len() as u64, &mut hasher);
        hasher.update(cover);
    }
    hex::encode(hasher.finalize())
}

/// Metadata digest, streaming the cover from disk when given
#[tracing::instrument(
    name = "digest.metadata",
    skip_all,
    fields(cover = ?cover),
    err
)]
pub fn metadata_digest(metadata: &BookMetadata, cover: Option<&Path>) -> Result<String, UploadError> {
    let mut hasher = Sha256::new();
    write_digest_input(metadata, &mut hasher)
        .map_err(|e| UploadError::io("<metadata>", e))?;

    if let Some(path) = cover {
        let file = File::open(path).map_err(|e| UploadError::io(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| UploadError::io(path, e))?
            .len();

        write_cover_preamble(size, &mut hasher).map_err(|e| UploadError::io(path, e))?;

        let mut reader = io::BufReader::with_capacity(COVER_CHUNK_SIZE, file);
        let copied = io::copy(&mut reader, &mut hasher).map_err(|e| UploadError::io(path, e))?;
        if copied != size {
            return Err(UploadError::io(
                path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("cover changed while reading: expected {} bytes, read {}", size, copied),
                ),
            ));
        }
    }

    let digest = hex::encode(hasher.finalize());
    tracing::debug!(sha256 = %digest, "Metadata digest computed");
    Ok(digest)
}
