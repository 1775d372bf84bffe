use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::info;

use crate::document::{decode_document, encode_document, CodecError, DecodedDocument, Document};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write document at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("document at {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

pub fn read_document_file(path: &Path) -> Result<DecodedDocument, TransportError> {
    let raw = fs::read_to_string(path).map_err(|source| TransportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_document(&raw).map_err(|source| TransportError::Codec {
        path: path.to_path_buf(),
        source,
    })
}

/// Encodes the document and replaces `path` through a sibling temp file, so
/// readers never observe a half-written document.
pub fn write_document_file(path: &Path, document: &Document) -> Result<(), TransportError> {
    let text = encode_document(document).map_err(|source| TransportError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    write_text_atomic(path, &text).map_err(|source| TransportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        bytes = text.len(),
        grids = document.grids.len(),
        "document_written"
    );
    Ok(())
}

fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = staging_path_for(path);
    let staged = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(text.as_bytes())?;
        file.sync_all()
    });
    // `rename` replaces an existing target in one step; never remove it first.
    let result = staged.and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Sibling of `path` unique to this process and call, so concurrent writers
/// never share a staging file.
fn staging_path_for(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "grid.json".to_string());
    let tmp_name = format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, GridRecord, FORMAT_VERSION};

    fn document() -> Document {
        Document {
            format_version: FORMAT_VERSION,
            metadata: DocumentMetadata {
                original_id: "grid#3".to_string(),
                author_id: "tester".to_string(),
                display_name: "Depot".to_string(),
                timestamp: 42,
                original_rotation: None,
                category: Some("grid".to_string()),
            },
            grids: vec![GridRecord {
                grid_id: "0".to_string(),
                tiles: Vec::new(),
                entities: Vec::new(),
                decal_data: None,
            }],
        }
    }

    #[test]
    fn write_replaces_existing_file_and_reads_back() {
        let temp = tempfile::TempDir::new().expect("temp");
        let path = temp.path().join("saves").join("depot.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "stale").expect("seed");

        write_document_file(&path, &document()).expect("write");
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        let decoded = read_document_file(&path).expect("read");
        assert_eq!(decoded.document, document());
    }

    #[test]
    fn failed_write_leaves_no_staging_file() {
        let temp = tempfile::TempDir::new().expect("temp");
        let path = temp.path().join("depot.json");
        write_document_file(&path, &document()).expect("first write");

        // A directory at the target makes the final rename fail.
        let blocked = temp.path().join("blocked.json");
        fs::create_dir_all(blocked.join("inner")).expect("mkdir");
        assert!(matches!(
            write_document_file(&blocked, &document()),
            Err(TransportError::Write { .. })
        ));
        let names = fs::read_dir(temp.path())
            .expect("list")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{names:?}");
        assert_eq!(read_document_file(&path).expect("read").document, document());
    }

    #[test]
    fn staging_paths_are_unique_siblings() {
        let path = Path::new("saves").join("depot.json");
        let first = staging_path_for(&path);
        let second = staging_path_for(&path);
        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
    }

    #[test]
    fn read_errors_carry_the_path() {
        let temp = tempfile::TempDir::new().expect("temp");
        let missing = temp.path().join("missing.json");
        let err = read_document_file(&missing).expect_err("missing");
        assert!(err.to_string().contains("missing.json"));

        let garbage = temp.path().join("garbage.json");
        fs::write(&garbage, "{\"grids\": 5}").expect("write");
        assert!(matches!(
            read_document_file(&garbage),
            Err(TransportError::Codec { .. })
        ));
    }
}
