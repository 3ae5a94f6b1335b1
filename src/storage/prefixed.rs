use std::sync::Arc;

use crate::error::Result;
use crate::storage::{FileData, Storage, StorageInput, StorageOutput};

/// Storage facade that transparently prefixes all file names.
///
/// Segment and index writers receive a `PrefixedStorage` rooted at their own
/// directory, so they address files by their short names.
#[derive(Debug)]
pub struct PrefixedStorage {
    prefix: String,
    inner: Arc<dyn Storage>,
}

impl PrefixedStorage {
    /// Create a new prefixed storage namespace.
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Storage>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix, inner }
    }

    /// The directory this view is rooted at.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn map_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else if name.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}

impl Storage for PrefixedStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(&self.map_name(name))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.inner.create_output(&self.map_name(name))
    }

    fn read_all(&self, name: &str) -> Result<FileData> {
        self.inner.read_all(&self.map_name(name))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(&self.map_name(name))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(&self.map_name(name))
    }

    fn delete_dir(&self, dir: &str) -> Result<()> {
        self.inner.delete_dir(&self.map_name(dir.trim_matches('/')))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_dir(&self.prefix)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.inner.file_size(&self.map_name(name))
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner
            .rename_file(&self.map_name(old_name), &self.map_name(new_name))
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
