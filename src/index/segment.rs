//! Segment metadata and opened segment handles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::DocId;
use crate::index::deletion::{DELETION_MAP_FILE, DeletionMap};
use crate::index::version::{load_json, store_json};
use crate::storage::{Storage, sub_storage};

pub type SegmentId = u32;

pub const SEGMENT_INFO_FILE: &str = "segment_info.json";
pub const INDEX_DIR: &str = "index";
pub const ATTRIBUTE_DIR: &str = "attribute";

/// Directory name of segment `segment_id` inside a partition.
pub fn segment_dir_name(segment_id: SegmentId) -> String {
    format!("segment_{segment_id}")
}

/// Persistent description of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub doc_count: u32,
    /// Build progress at seal time, in microseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub locator: String,
    /// Produced by a merge rather than by a build.
    #[serde(default)]
    pub merged: bool,
}

impl SegmentInfo {
    pub fn store(&self, storage: &dyn Storage) -> Result<()> {
        store_json(storage, SEGMENT_INFO_FILE, self)
    }

    pub fn load(storage: &dyn Storage) -> Result<Self> {
        load_json(storage, SEGMENT_INFO_FILE)
    }
}

/// An opened, sealed segment addressed at a global base docid.
#[derive(Debug, Clone)]
pub struct SegmentData {
    info: SegmentInfo,
    base_doc_id: DocId,
    deletion_map: DeletionMap,
    storage: Arc<dyn Storage>,
}

impl SegmentData {
    /// Open segment `segment_id` of the partition stored in `partition`.
    pub fn open(
        partition: &Arc<dyn Storage>,
        segment_id: SegmentId,
        base_doc_id: DocId,
    ) -> Result<Self> {
        let storage = sub_storage(partition, &segment_dir_name(segment_id));
        let info = SegmentInfo::load(storage.as_ref())?;
        let deletion_map = if storage.file_exists(DELETION_MAP_FILE) {
            DeletionMap::load(storage.as_ref())?
        } else {
            DeletionMap::new(info.doc_count)
        };
        Ok(SegmentData {
            info,
            base_doc_id,
            deletion_map,
            storage,
        })
    }

    pub fn segment_id(&self) -> SegmentId {
        self.info.segment_id
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn doc_count(&self) -> u32 {
        self.info.doc_count
    }

    pub fn base_doc_id(&self) -> DocId {
        self.base_doc_id
    }

    pub fn deletion_map(&self) -> &DeletionMap {
        &self.deletion_map
    }

    pub(crate) fn deletion_map_mut(&mut self) -> &mut DeletionMap {
        &mut self.deletion_map
    }

    /// Re-address the segment at a different global base.
    pub fn with_base_doc_id(mut self, base_doc_id: DocId) -> Self {
        self.base_doc_id = base_doc_id;
        self
    }

    /// Storage rooted at the segment directory.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Storage rooted at `index/<name>`.
    pub fn index_storage(&self, index_name: &str) -> Arc<dyn Storage> {
        sub_storage(&self.storage, &format!("{INDEX_DIR}/{index_name}"))
    }

    /// Storage rooted at `attribute/<name>`.
    pub fn attribute_storage(&self, pack_name: &str) -> Arc<dyn Storage> {
        sub_storage(&self.storage, &format!("{ATTRIBUTE_DIR}/{pack_name}"))
    }

    pub fn contains(&self, global_doc_id: DocId) -> bool {
        global_doc_id >= self.base_doc_id
            && global_doc_id - self.base_doc_id < self.info.doc_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_open_segment() {
        let partition: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let segment = sub_storage(&partition, "segment_4");
        SegmentInfo {
            segment_id: 4,
            doc_count: 3,
            timestamp: 17,
            locator: String::new(),
            merged: false,
        }
        .store(segment.as_ref())
        .unwrap();

        let data = SegmentData::open(&partition, 4, 100).unwrap();
        assert_eq!(data.doc_count(), 3);
        assert_eq!(data.deletion_map().deleted_count(), 0);
        assert!(data.contains(102));
        assert!(!data.contains(103));
        assert!(!data.contains(99));

        data.index_storage("title").write_file("posting", b"x").unwrap();
        assert!(partition.file_exists("segment_4/index/title/posting"));
    }

    #[test]
    fn test_missing_segment() {
        let partition: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        assert!(SegmentData::open(&partition, 0, 0).unwrap_err().is_file_io());
    }
}
