use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use parking_lot::Mutex;

use crate::error::{Result, StorageError};

/// Positional byte storage backing the store: a real file on disk or an
/// in-memory buffer. The store never cares which — it only calls through
/// this trait — so tests can run entirely in memory.
pub trait FileBackend: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
    fn truncate(&self, len: u64) -> Result<()>;
    fn size(&self) -> Result<u64>;
    fn sync(&self) -> Result<()>;
    fn lock_exclusive(&self) -> Result<()>;
    fn file_name(&self) -> Option<&str>;
}

pub struct OsFileBackend {
    file: Mutex<File>,
    name: String,
}

impl OsFileBackend {
    pub fn open(file_name: impl Into<String>, read_only: bool) -> Result<Self> {
        let name = file_name.into();
        let file = File::options()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&name)?;
        Ok(OsFileBackend {
            file: Mutex::new(file),
            name,
        })
    }
}

impl FileBackend for OsFileBackend {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| StorageError::ReadingFailed(e.to_string()))?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
            .map_err(|e| StorageError::WritingFailed(e.to_string()))
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.lock();
        Ok(file.metadata()?.len())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<()> {
        let file = self.file.lock();
        file.try_lock_exclusive().map_err(|_| StorageError::FileLocked)
    }

    fn file_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Backing store for `fileName = null`: the whole file lives in a growable
/// byte buffer, never touching disk.
#[derive(Default)]
pub struct InMemoryBackend {
    data: Mutex<Vec<u8>>,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl FileBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.data.lock();
        let start = offset as usize;
        let end = start + len;
        if end > data.len() {
            return Err(StorageError::ReadingFailed("read past end of file".into()));
        }
        Ok(data[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<()> {
        Ok(())
    }

    fn file_name(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_backend_grows_on_write() {
        let backend = InMemoryBackend::new();
        backend.write_at(10, b"hello").unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(10, 5).unwrap(), b"hello");
    }

    #[test]
    fn in_memory_backend_rejects_read_past_end() {
        let backend = InMemoryBackend::new();
        backend.write_at(0, b"hi").unwrap();
        assert!(backend.read_at(0, 10).is_err());
    }

    #[test]
    fn os_file_backend_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let backend = OsFileBackend::open(path.to_str().unwrap(), false).unwrap();
        backend.write_at(0, b"abcdef").unwrap();
        assert_eq!(backend.read_at(2, 3).unwrap(), b"cde");
        backend.sync().unwrap();
        backend.truncate(3).unwrap();
        assert_eq!(backend.size().unwrap(), 3);
    }
}
