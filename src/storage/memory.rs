//! In-memory storage implementation for tests and scratch partitions.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{FileData, Storage, StorageError, StorageInput, StorageOutput};

type FileMap = Arc<Mutex<BTreeMap<String, Arc<[u8]>>>>;

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageConfig {
    /// Initial buffer capacity of every new output.
    pub initial_capacity: usize,
}

/// An in-memory storage implementation.
///
/// Files are immutable once published; readers share the published buffer.
#[derive(Debug)]
pub struct MemoryStorage {
    files: FileMap,
    config: MemoryStorageConfig,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(BTreeMap::new())),
            config,
        }
    }

    /// Create a new memory storage with default configuration.
    pub fn new_default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    fn get(&self, name: &str) -> Result<Arc<[u8]>> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput::new(self.get(name)?)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        if name.is_empty() || name.starts_with('/') || name.split('/').any(|p| p == "..") {
            return Err(StorageError::InvalidName(name.to_string()).into());
        }
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
            self.config.initial_capacity,
        )))
    }

    fn read_all(&self, name: &str) -> Result<FileData> {
        Ok(FileData::Owned(self.get(name)?))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn delete_dir(&self, dir: &str) -> Result<()> {
        let prefix = format!("{}/", dir.trim_matches('/'));
        self.files.lock().retain(|name, _| !name.starts_with(&prefix));
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        // BTreeMap keys are already sorted.
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.get(name)?.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based input stream.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
    size: u64,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        let size = data.len() as u64;
        MemoryInput {
            cursor: Cursor::new(data),
            size,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> u64 {
        self.size
    }
}

/// A memory-based output stream; the file is published on close or drop.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap, capacity: usize) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::with_capacity(capacity),
            files,
            closed: false,
        }
    }

    fn publish(&mut self) {
        if self.closed {
            return;
        }
        let data: Arc<[u8]> = Arc::from(std::mem::take(&mut self.buffer));
        self.files.lock().insert(self.name.clone(), data);
        self.closed = true;
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(format!(
                "output {} already closed",
                self.name
            )));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.publish();
    }
}
