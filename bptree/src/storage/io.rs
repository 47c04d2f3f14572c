//! Byte-level storage backends.
//!
//! The page store never touches `std::fs` directly. It goes through the
//! `Storage` trait so the same code runs on a real file in production and on an
//! in-memory buffer in tests, where faults can be injected deterministically.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read_at` returns the last bytes written at that offset
//! - reading past the end yields zeros, not an error
//! - `sync` makes all previous writes durable

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error from the backend.
    Io(std::io::Error),
    /// Refused to create a store over an existing file.
    AlreadyExists(PathBuf),
    /// Page number beyond the allocated range.
    PageOutOfBounds { page_id: u64, total_pages: u64 },
    /// On-disk bytes do not describe a valid structure.
    Corruption(String),
    /// A caller-supplied argument is out of range.
    InvalidArgument(String),
    /// Injected fault for testing.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(path) => write!(f, "file already exists: {}", path.display()),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Positional byte storage underneath a page store.
pub trait Storage: Send {
    /// Fill `buf` from `offset`. Bytes beyond the end of storage read as zero.
    ///
    /// Returns how many bytes actually came from storage.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write all of `buf` at `offset`, extending storage if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// Current length in bytes.
    fn len(&self) -> Result<u64, StorageError>;

    /// Whether storage holds no bytes yet.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Storage backed by a regular file.
pub struct FileStorage {
    file: File,
    path: PathBuf,
}

impl FileStorage {
    /// Create a new file. Fails if `path` already exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        if path.exists() {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path this storage was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        buf[filled..].fill(0);
        Ok(filled)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }
}

/// Storage kept entirely in memory.
///
/// Clones share the same buffer, so a test can keep a handle after moving one
/// into a store, reopen the store from it, or make the next N writes fail to
/// exercise error propagation without a real disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    data: Vec<u8>,
    failing_writes: usize,
}

impl MemoryStorage {
    /// Create an empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("lock poisoned")
    }

    /// Make the next `count` writes fail with `StorageError::InjectedFault`.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner().failing_writes = count;
    }

    /// Copy of the raw contents, for inspection in tests.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner().data.clone()
    }
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let start = usize::try_from(offset)
            .map_err(|_| StorageError::InvalidArgument(format!("offset {offset} too large")))?;
        let inner = self.inner();
        let available = inner.data.len().saturating_sub(start).min(buf.len());
        if available > 0 {
            buf[..available].copy_from_slice(&inner.data[start..start + available]);
        }
        buf[available..].fill(0);
        Ok(available)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(StorageError::InjectedFault(format!(
                "write of {} bytes at offset {offset}",
                buf.len()
            )));
        }
        let start = usize::try_from(offset)
            .map_err(|_| StorageError::InvalidArgument(format!("offset {offset} too large")))?;
        let end = start + buf.len();
        if inner.data.len() < end {
            inner.data.resize(end, 0);
        }
        inner.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.inner().data.len() as u64)
    }
}
