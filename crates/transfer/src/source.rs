use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use crate::TransferError;

/// Read-only, positional access to the bytes of one upload.
///
/// Implementations are driven from a blocking thread, one read at a time.
pub trait UploadSource: Send + Sync {
    /// File name reported to the server.
    fn name(&self) -> &str;

    /// Total size in bytes; fixed for the lifetime of the transfer.
    fn size(&self) -> u64;

    /// Last-modified time in epoch milliseconds.
    fn last_modified(&self) -> i64;

    /// Reads up to `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on local disk.
///
/// Size and modification time are captured when the file is opened.
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
    last_modified: i64,
    file: Mutex<std::fs::File>,
}

impl FileSource {
    /// Opens `path` for reading.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(TransferError::SourceUnavailable(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            last_modified,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        (&mut *file).take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory buffer, for generated content and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    last_modified: i64,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, last_modified: i64, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            last_modified,
            data,
        }
    }
}

impl UploadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn file_source_metadata() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "notes.txt", b"0123456789");
        let src = FileSource::open(&path).unwrap();
        assert_eq!(src.name(), "notes.txt");
        assert_eq!(src.size(), 10);
        assert!(src.last_modified() > 0);
        assert_eq!(src.path(), path.as_path());
    }

    #[test]
    fn file_source_positional_reads() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "data.bin", b"AABBCCDDEE");
        let src = FileSource::open(&path).unwrap();
        assert_eq!(src.read_at(4, 4).unwrap(), b"CCDD");
        assert_eq!(src.read_at(0, 2).unwrap(), b"AA");
        // Clipped at EOF.
        assert_eq!(src.read_at(8, 4).unwrap(), b"EE");
    }

    #[test]
    fn file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::open(&dir.path().join("absent.bin"));
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn file_source_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::open(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn memory_source_reads() {
        let src = MemorySource::new("m.bin", 7, b"hello world".to_vec());
        assert_eq!(src.size(), 11);
        assert_eq!(src.last_modified(), 7);
        assert_eq!(src.read_at(6, 5).unwrap(), b"world");
        assert_eq!(src.read_at(9, 10).unwrap(), b"ld");
        assert!(src.read_at(50, 10).unwrap().is_empty());
    }
}
