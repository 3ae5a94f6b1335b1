//! Versions, partition meta and the index format version.

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::segment::SegmentId;
use crate::storage::Storage;

pub const SCHEMA_FILE: &str = "schema.json";
pub const INDEX_FORMAT_VERSION_FILE: &str = "index_format_version";
pub const PARTITION_META_FILE: &str = "partition_meta.json";
pub const VERSION_FILE_PREFIX: &str = "version.";

/// On-disk format version written by this crate.
pub const CURRENT_INDEX_FORMAT_VERSION: &str = "1.0.0";

/// The on-disk format a partition was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFormatVersion {
    pub index_format_version: String,
}

impl Default for IndexFormatVersion {
    fn default() -> Self {
        IndexFormatVersion {
            index_format_version: CURRENT_INDEX_FORMAT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A sort key declared by the partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescription {
    pub field: String,
    pub order: SortOrder,
}

/// Partition-wide metadata. A non-empty sort description turns every merge
/// of the partition into a sort merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    #[serde(default)]
    pub sort_descriptions: Vec<SortDescription>,
}

impl PartitionMeta {
    pub fn sorted_by(field: impl Into<String>, order: SortOrder) -> Self {
        PartitionMeta {
            sort_descriptions: vec![SortDescription {
                field: field.into(),
                order,
            }],
        }
    }

    pub fn is_sorted(&self) -> bool {
        !self.sort_descriptions.is_empty()
    }
}

/// A consistent view of a partition: the segments a reader should open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: u32,
    pub segment_ids: Vec<SegmentId>,
    /// Build progress, in microseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub locator: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
}

fn default_shard_count() -> u32 {
    1
}

impl Version {
    pub fn new(version_id: u32) -> Self {
        Version {
            version_id,
            segment_ids: Vec::new(),
            timestamp: 0,
            locator: String::new(),
            shard_count: 1,
        }
    }

    pub fn file_name(version_id: u32) -> String {
        format!("{VERSION_FILE_PREFIX}{version_id}")
    }

    /// Highest segment id referenced, if any.
    pub fn last_segment_id(&self) -> Option<SegmentId> {
        self.segment_ids.iter().copied().max()
    }

    pub fn store(&self, storage: &dyn Storage) -> Result<()> {
        store_json(storage, &Self::file_name(self.version_id), self)
    }

    pub fn load(storage: &dyn Storage, version_id: u32) -> Result<Self> {
        load_json(storage, &Self::file_name(version_id))
    }

    /// Ids of every version file at the partition root, ascending.
    pub fn list(storage: &dyn Storage) -> Result<Vec<u32>> {
        let mut ids: Vec<u32> = storage
            .list_files()?
            .iter()
            .filter_map(|name| name.strip_prefix(VERSION_FILE_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// The newest version, or `None` for a partition without versions.
    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Self>> {
        match Self::list(storage)?.last() {
            Some(&id) => Ok(Some(Self::load(storage, id)?)),
            None => Ok(None),
        }
    }
}

/// Serialize `value` as pretty JSON into `name`.
pub fn store_json<T: Serialize>(storage: &dyn Storage, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    storage.write_file(name, &json)
}

/// Deserialize JSON stored in `name`.
pub fn load_json<T: for<'de> Deserialize<'de>>(storage: &dyn Storage, name: &str) -> Result<T> {
    let data = storage.read_all(name)?;
    serde_json::from_slice(&data)
        .map_err(|e| IndexlibError::index(format!("failed to parse {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_latest_version() {
        let storage = MemoryStorage::new_default();
        assert!(Version::load_latest(&storage).unwrap().is_none());

        let mut version = Version::new(2);
        version.segment_ids = vec![0, 3];
        version.store(&storage).unwrap();
        Version::new(10).store(&storage).unwrap();
        storage.write_file("version.tmp", b"{}").unwrap();

        assert_eq!(Version::list(&storage).unwrap(), vec![2, 10]);
        assert_eq!(Version::load_latest(&storage).unwrap().unwrap().version_id, 10);
        assert_eq!(Version::load(&storage, 2).unwrap().last_segment_id(), Some(3));
    }

    #[test]
    fn test_partition_meta_defaults() {
        let meta: PartitionMeta = serde_json::from_str("{}").unwrap();
        assert!(!meta.is_sorted());

        let meta = PartitionMeta::sorted_by("price", SortOrder::Descending);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"descending\""));
    }

    #[test]
    fn test_corrupted_json_is_index_error() {
        let storage = MemoryStorage::new_default();
        storage.write_file("version.1", b"not json").unwrap();
        assert!(matches!(
            Version::load(&storage, 1),
            Err(IndexlibError::Index(_))
        ));
    }
}
