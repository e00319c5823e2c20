//! Serializing the live database back to the working file.
//!
//! Writes are exclusive per normalized absolute path: concurrent writers to
//! the same file serialize, writers to different files proceed
//! independently. Content goes to a temp file in the target directory first
//! and replaces the target atomically only on full success. A target
//! encoding that cannot represent the content losslessly is refused before
//! any bytes land on disk.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::bib::codec;
use crate::bib::record::BibDatabase;
use crate::errors::WriteError;

/// Process-wide registry of per-path write locks.
static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Atomic, path-exclusive writer for the library file.
pub struct ContentWriter;

impl ContentWriter {
    /// Serialize `db` and atomically replace the file at `path`, encoded as
    /// `encoding_label` (a WHATWG label such as `utf-8` or `windows-1252`).
    pub fn write(path: &Path, db: &BibDatabase, encoding_label: &str) -> Result<(), WriteError> {
        let encoding = encoding_rs::Encoding::for_label(encoding_label.as_bytes())
            .ok_or_else(|| WriteError::UnknownEncoding(encoding_label.to_string()))?;

        let normalized = normalize_path(path);
        let lock = lock_for(&normalized);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let text = codec::serialize(db.records());
        let (bytes, _, had_errors) = encoding.encode(&text);
        if had_errors {
            return Err(WriteError::Encoding {
                encoding: encoding.name().to_string(),
                path: path.display().to_string(),
            });
        }

        let dir = normalized
            .parent()
            .ok_or_else(|| WriteError::InvalidPath(path.display().to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&normalized).map_err(|e| WriteError::Io(e.error))?;

        info!(
            path = %normalized.display(),
            bytes = bytes.len(),
            encoding = encoding.name(),
            "wrote library file"
        );
        Ok(())
    }
}

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut registry = PATH_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    registry
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Absolute path with the parent directory canonicalized, so that two spellings
/// of the same file contend on the same lock. The file itself may not exist yet.
fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(dir), Some(name)) => match dir.canonicalize() {
            Ok(dir) => dir.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}
