//! File-based storage implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexlibError, Result};
use crate::storage::{FileData, Storage, StorageError, StorageInput, StorageOutput};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Root directory of the storage.
    pub path: PathBuf,

    /// Serve [`Storage::read_all`] from memory maps instead of heap copies.
    pub use_mmap: bool,

    /// Buffer size for streaming I/O.
    pub buffer_size: usize,

    /// Fsync every file when it is closed.
    pub sync_writes: bool,
}

impl FileStorageConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            use_mmap: false,
            buffer_size: 65536, // 64KB
            sync_writes: false,
        }
    }
}

/// A file-based storage implementation.
#[derive(Debug)]
pub struct FileStorage {
    /// The root directory for storage.
    directory: PathBuf,
    /// Storage configuration.
    config: FileStorageConfig,
}

impl FileStorage {
    /// Create a new file storage in the given directory.
    pub fn new<P: AsRef<Path>>(directory: P, config: FileStorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            std::fs::create_dir_all(&directory).map_err(|e| {
                IndexlibError::file_io(format!(
                    "failed to create directory {}: {e}",
                    directory.display()
                ))
            })?;
        }

        if !directory.is_dir() {
            return Err(IndexlibError::storage(format!(
                "path is not a directory: {}",
                directory.display()
            )));
        }

        Ok(FileStorage { directory, config })
    }

    /// Root directory of this storage.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolve a relative name, refusing anything that escapes the root.
    fn file_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidName(name.to_string()).into());
        }
        Ok(self.directory.join(relative))
    }

    fn collect_files(&self, dir: &Path, files: &mut Vec<String>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| StorageError::IoError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::IoError(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, files)?;
            } else if let Ok(relative) = path.strip_prefix(&self.directory) {
                let name: Vec<_> = relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect();
                files.push(name.join("/"));
            }
        }
        Ok(())
    }
}

fn io_error(name: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::FileNotFound(name.to_string())
    } else {
        StorageError::IoError(format!("{name}: {e}"))
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let file = File::open(self.file_path(name)?).map_err(|e| io_error(name, e))?;
        Ok(Box::new(FileInput::new(file, self.config.buffer_size)?))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.file_path(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(name, e))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_error(name, e))?;

        Ok(Box::new(FileOutput::new(
            file,
            self.config.buffer_size,
            self.config.sync_writes,
        )))
    }

    fn read_all(&self, name: &str) -> Result<FileData> {
        let path = self.file_path(name)?;
        let mut file = File::open(&path).map_err(|e| io_error(name, e))?;
        let len = file.metadata().map_err(|e| io_error(name, e))?.len();
        if len == 0 {
            return Ok(FileData::empty());
        }

        if self.config.use_mmap {
            // SAFETY: index files are written once and never modified after close.
            let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| io_error(name, e))?;
            return Ok(FileData::Mapped(Arc::new(mmap)));
        }

        let mut bytes = Vec::with_capacity(len as usize);
        file.read_to_end(&mut bytes).map_err(|e| io_error(name, e))?;
        Ok(FileData::Owned(Arc::from(bytes)))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| io_error(name, e))?;
        }
        Ok(())
    }

    fn delete_dir(&self, dir: &str) -> Result<()> {
        let path = self.file_path(dir.trim_matches('/'))?;
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| io_error(dir, e))?;
        }
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        self.collect_files(&self.directory, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let metadata = self
            .file_path(name)?
            .metadata()
            .map_err(|e| io_error(name, e))?;
        Ok(metadata.len())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self.file_path(old_name)?;
        let new_path = self.file_path(new_name)?;
        if let Some(parent) = new_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(new_name, e))?;
        }
        std::fs::rename(&old_path, &new_path).map_err(|e| io_error(old_name, e))?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // Files are synced individually when closed.
        Ok(())
    }
}

/// A file input implementation.
#[derive(Debug)]
pub struct FileInput {
    reader: BufReader<File>,
    size: u64,
}

impl FileInput {
    fn new(file: File, buffer_size: usize) -> Result<Self> {
        let size = file
            .metadata()
            .map_err(|e| StorageError::IoError(format!("failed to get file metadata: {e}")))?
            .len();
        Ok(FileInput {
            reader: BufReader::with_capacity(buffer_size, file),
            size,
        })
    }
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> u64 {
        self.size
    }
}

/// A file output implementation.
#[derive(Debug)]
pub struct FileOutput {
    writer: BufWriter<File>,
    sync_writes: bool,
    position: u64,
}

impl FileOutput {
    fn new(file: File, buffer_size: usize, sync_writes: bool) -> Self {
        FileOutput {
            writer: BufWriter::with_capacity(buffer_size, file),
            sync_writes,
            position: 0,
        }
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes_written = self.writer.write(buf)?;
        self.position += bytes_written as u64;
        Ok(bytes_written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageOutput for FileOutput {
    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| StorageError::IoError(format!("failed to flush: {e}")))?;
        if self.sync_writes {
            self.writer
                .get_ref()
                .sync_all()
                .map_err(|e| StorageError::IoError(format!("failed to sync: {e}")))?;
        }
        Ok(())
    }
}
