//! Storage abstraction layer.
//!
//! Partitions, segments and index directories all live behind the [`Storage`]
//! trait. File names are `/`-separated paths relative to the storage root, so
//! `segment_0/index/title/posting` addresses a posting file of segment 0.
//! [`prefixed::PrefixedStorage`] gives each segment or index its own view
//! without the callee knowing where that view is rooted.
//!
//! # Example
//!
//! ```
//! use indexlib::storage::memory::MemoryStorageConfig;
//! use indexlib::storage::{StorageConfig, StorageFactory};
//!
//! # fn main() -> indexlib::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! storage.write_file("segment_0/segment_info.json", b"{}")?;
//! assert!(storage.file_exists("segment_0/segment_info.json"));
//! assert_eq!(storage.list_dir("segment_0")?, vec!["segment_info.json".to_string()]);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::{Read, Seek, Write};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{IndexlibError, Result};

pub mod file;
pub mod memory;
pub mod prefixed;
pub mod structured;

pub use prefixed::PrefixedStorage;
pub use structured::{StructReader, StructWriter};

/// A pluggable backend holding immutable index files.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Open a file for streaming reads.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing. Parent directories are implicit.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Load a whole file. File backends may hand out a memory map.
    fn read_all(&self, name: &str) -> Result<FileData>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Delete every file below `dir`.
    fn delete_dir(&self, dir: &str) -> Result<()>;

    /// List every file, recursively, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing `new_name` if it exists.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;

    /// Write `data` as the complete content of `name`.
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut output = self.create_output(name)?;
        output.write_all(data)?;
        output.close()
    }

    /// Files directly or indirectly below `dir`, relative to it.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return self.list_files();
        }
        let prefix = format!("{dir}/");
        Ok(self
            .list_files()?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Whether the storage holds no file at all.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.list_files()?.is_empty())
    }
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> u64;
}

/// A trait for writing data to storage.
///
/// Data becomes visible to readers once [`StorageOutput::close`] returns.
pub trait StorageOutput: Write + Send + fmt::Debug {
    /// Bytes written so far.
    fn position(&self) -> u64;

    /// Flush and publish the file.
    fn close(&mut self) -> Result<()>;
}

impl<T: StorageInput + ?Sized> StorageInput for Box<T> {
    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<T: StorageOutput + ?Sized> StorageOutput for Box<T> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Whole-file contents, either owned or memory mapped.
#[derive(Clone)]
pub enum FileData {
    Owned(Arc<[u8]>),
    Mapped(Arc<memmap2::Mmap>),
}

impl FileData {
    pub fn empty() -> Self {
        FileData::Owned(Arc::from(Vec::new()))
    }
}

impl Deref for FileData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileData::Owned(bytes) => bytes,
            FileData::Mapped(mmap) => mmap,
        }
    }
}

impl fmt::Debug for FileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            FileData::Owned(_) => "owned",
            FileData::Mapped(_) => "mapped",
        };
        f.debug_struct("FileData")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

/// Open a namespaced view of `storage` rooted at `dir`.
pub fn sub_storage(storage: &Arc<dyn Storage>, dir: &str) -> Arc<dyn Storage> {
    Arc::new(PrefixedStorage::new(dir, Arc::clone(storage)))
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// File-based storage configuration (includes path)
    File(file::FileStorageConfig),

    /// Memory-based storage configuration
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a new storage instance with the given configuration.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                Ok(Arc::new(memory::MemoryStorage::new(mem_config)))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                Ok(Arc::new(file::FileStorage::new(&path, file_config)?))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// I/O error.
    IoError(String),

    /// Invalid file name.
    InvalidName(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::InvalidName(name) => write!(f, "Invalid file name: {name}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for IndexlibError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName(_) => IndexlibError::storage(err.to_string()),
            _ => IndexlibError::file_io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::FileStorageConfig;
    use crate::storage::memory::MemoryStorageConfig;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("posting".to_string());
        assert_eq!(err.to_string(), "File not found: posting");

        let err = StorageError::IoError("connection failed".to_string());
        assert_eq!(err.to_string(), "I/O error: connection failed");
    }

    #[test]
    fn test_storage_error_maps_to_file_io() {
        let err: IndexlibError = StorageError::FileNotFound("x".to_string()).into();
        assert!(err.is_file_io());

        let err: IndexlibError = StorageError::InvalidName("../x".to_string()).into();
        assert!(!err.is_file_io());
    }

    #[test]
    fn test_storage_factory_memory() {
        let storage =
            StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default())).unwrap();
        assert!(storage.is_empty().unwrap());
        assert!(!storage.file_exists("version.0"));
    }

    #[test]
    fn test_storage_factory_file_with_mmap() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut file_config = FileStorageConfig::new(temp_dir.path());
        file_config.use_mmap = true;
        let storage = StorageFactory::create(StorageConfig::File(file_config)).unwrap();

        storage.write_file("segment_0/data", b"Hello, Factory!").unwrap();
        let data = storage.read_all("segment_0/data").unwrap();

        assert_eq!(&data[..], b"Hello, Factory!");
        assert!(matches!(data, FileData::Mapped(_)));
    }

    #[test]
    fn test_list_dir_strips_prefix() {
        let storage =
            StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default())).unwrap();
        storage.write_file("segment_0/a", b"1").unwrap();
        storage.write_file("segment_0/index/b", b"2").unwrap();
        storage.write_file("segment_1/a", b"3").unwrap();

        assert_eq!(
            storage.list_dir("segment_0").unwrap(),
            vec!["a".to_string(), "index/b".to_string()]
        );
    }
}
