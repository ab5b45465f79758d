//! File index: scan the shared directory, hash contents, answer local
//! queries.
//!
//! The index owns its file list. `refresh` rebuilds the list off-lock
//! (directory walk plus streaming SHA-256 per file) and swaps it in
//! atomically, so readers always observe a consistent snapshot. The
//! index does not watch the filesystem; callers refresh on demand.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::config::CHUNK_SIZE;

/// Extensions never advertised, on top of dot-prefixed names.
const SKIP_EXTENSIONS: [&str; 4] = ["tmp", "log", "lock", "pid"];

/// One shared or advertised file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub filename: String,
    /// Absolute path on disk. Empty for records describing remote files.
    pub filepath: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the full byte stream.
    pub hash: String,
    /// Seconds since epoch.
    pub last_modified: u64,
}

impl FileInfo {
    /// Record for a file advertised by a remote peer; only name, size
    /// and hash are authoritative.
    pub fn remote(filename: String, size: u64, hash: String, last_modified: u64) -> Self {
        Self {
            filename,
            filepath: String::new(),
            size,
            hash,
            last_modified,
        }
    }
}

/// Index of the local shared directory.
#[derive(Debug)]
pub struct FileIndex {
    shared_dir: PathBuf,
    files: Mutex<Vec<FileInfo>>,
}

impl FileIndex {
    /// Open an index over `dir`, creating the directory if absent.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let shared_dir = dir.into();
        fs::create_dir_all(&shared_dir)?;
        Ok(Self {
            shared_dir,
            files: Mutex::new(Vec::new()),
        })
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    /// Rescan the shared directory and atomically replace the file list.
    /// Returns the number of indexed files.
    pub fn refresh(&self) -> std::io::Result<usize> {
        let mut scanned = Vec::new();
        scan_dir(&self.shared_dir, &mut scanned)?;
        let count = scanned.len();
        *self.files.lock().unwrap() = scanned;
        debug!(
            event = "index_refreshed",
            files = count,
            dir = %self.shared_dir.display(),
            "Shared directory scanned"
        );
        Ok(count)
    }

    /// Consistent snapshot of the current list.
    pub fn list(&self) -> Vec<FileInfo> {
        self.files.lock().unwrap().clone()
    }

    pub fn has(&self, filename: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .iter()
            .any(|f| f.filename == filename)
    }

    pub fn info(&self, filename: &str) -> Option<FileInfo> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.filename == filename)
            .cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Recompute the SHA-256 of `path` and compare against
    /// `expected_hash`. Any I/O error counts as a failed validation.
    pub fn validate(&self, path: impl AsRef<Path>, expected_hash: &str) -> bool {
        match hash_file(path.as_ref()) {
            Ok(actual) => actual == expected_hash,
            Err(_) => false,
        }
    }

    /// File size in bytes; 0 on any filesystem error.
    pub fn size_of(&self, path: impl AsRef<Path>) -> u64 {
        fs::metadata(path.as_ref()).map(|m| m.len()).unwrap_or(0)
    }
}

/// Whether a file may be advertised: not dot-prefixed, and not one of
/// the skipped extensions. Applies to file names only; traversal
/// descends into every directory.
fn is_eligible(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    if name.starts_with('.') {
        return false;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !SKIP_EXTENSIONS.contains(&ext),
        None => true,
    }
}

fn scan_dir(dir: &Path, out: &mut Vec<FileInfo>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            scan_dir(&path, out)?;
            continue;
        }
        if !meta.is_file() || !is_eligible(&path) {
            continue;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let hash = match hash_file(&path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    event = "index_hash_failure",
                    file = %path.display(),
                    error = %e,
                    "Skipping unreadable file"
                );
                continue;
            }
        };
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        out.push(FileInfo {
            filename,
            filepath: path.to_string_lossy().into_owned(),
            size: meta.len(),
            hash,
            last_modified,
        });
    }
    Ok(())
}

/// Streaming SHA-256 of a file, lowercase hex.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
