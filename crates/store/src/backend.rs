//! Durable key/value backends for the shared session register.
//!
//! [`FileBackend`] keeps a small JSON object on disk so the active job
//! survives process restarts and is visible to every client pointed at
//! the same state directory. [`MemoryBackend`] is the volatile variant
//! used when no directory is configured and in tests.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name of the durable register inside the state directory.
pub const STATE_FILE_NAME: &str = "session.json";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure reading or writing the durable register.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// The state file or directory could not be read or written.
    #[error("Session store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file exists but is not a JSON object of strings.
    #[error("Session store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// SessionBackend
// ---------------------------------------------------------------------------

/// A durable string register keyed by name.
pub trait SessionBackend: Send + Sync {
    /// Read a key, `None` when absent.
    fn load(&self, key: &str) -> Result<Option<String>, SessionStoreError>;

    /// Write a key, removing it when `value` is `None`.
    fn store(&self, key: &str, value: Option<&str>) -> Result<(), SessionStoreError>;
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

/// JSON-file backend rooted at a state directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so
/// a reader never observes a half-written file. Concurrent writers from
/// separate processes resolve by whichever rename lands last.
pub struct FileBackend {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (and create if needed) the state directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| SessionStoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: dir.join(STATE_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(SessionStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| SessionStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), SessionStoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(entries).map_err(|source| {
            SessionStoreError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&tmp, json).map_err(|source| SessionStoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| SessionStoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SessionBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn store(&self, key: &str, value: Option<&str>) -> Result<(), SessionStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        // A corrupt file is replaced rather than blocking every later write.
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(SessionStoreError::Corrupt { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "Replacing corrupt session store file");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        match value {
            Some(v) => {
                entries.insert(key.to_string(), v.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        self.write_all(&entries)
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Volatile backend; values live as long as the backend does.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: Option<&str>) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(v) => {
                entries.insert(key.to_string(), v.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
