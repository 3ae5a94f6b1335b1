//! Per-segment deletion map.
//!
//! Deleting a document never frees its docid; the bit is set in the
//! segment's `deletionmap` file and the reclaim map of the next merge drops
//! the document.

use bit_vec::BitVec;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::Storage;

/// File name of the deletion map inside a segment directory.
pub const DELETION_MAP_FILE: &str = "deletionmap";

const DELETION_MAP_MAGIC: u32 = 0x4445_4C42; // "DELB"
const DELETION_MAP_VERSION: u32 = 1;

/// A bitmap of deleted documents (bit set = deleted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionMap {
    deleted: BitVec,
    deleted_count: u32,
}

impl DeletionMap {
    /// A map for `doc_count` documents with nothing deleted.
    pub fn new(doc_count: u32) -> Self {
        DeletionMap {
            deleted: BitVec::from_elem(doc_count as usize, false),
            deleted_count: 0,
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.deleted.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count() - self.deleted_count
    }

    /// Mark a document deleted. Returns false if it already was.
    pub fn delete(&mut self, doc_id: DocId) -> Result<bool> {
        if doc_id >= self.doc_count() {
            return Err(IndexlibError::invalid_argument(format!(
                "docid {doc_id} out of range for segment of {} docs",
                self.doc_count()
            )));
        }
        if self.deleted.get(doc_id as usize).unwrap_or(false) {
            return Ok(false);
        }
        self.deleted.set(doc_id as usize, true);
        self.deleted_count += 1;
        Ok(true)
    }

    /// Out-of-range ids read as not deleted.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.get(doc_id as usize).unwrap_or(false)
    }

    /// Deleted docids in increasing order.
    pub fn deleted_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        self.deleted
            .iter()
            .enumerate()
            .filter_map(|(i, bit)| bit.then_some(i as DocId))
    }

    /// Write the map to `storage` as [`DELETION_MAP_FILE`].
    pub fn store(&self, storage: &dyn Storage) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(DELETION_MAP_FILE)?);
        writer.write_u32(DELETION_MAP_MAGIC)?;
        writer.write_u32(DELETION_MAP_VERSION)?;
        writer.write_u32(self.doc_count())?;
        writer.write_u32(self.deleted_count)?;
        writer.write_bytes(&self.deleted.to_bytes())?;
        writer.close()
    }

    /// Load the map written by [`DeletionMap::store`].
    pub fn load(storage: &dyn Storage) -> Result<Self> {
        let data = storage.read_all(DELETION_MAP_FILE)?;
        let mut reader = StructReader::new(&data[..]);

        let magic = reader.read_u32()?;
        if magic != DELETION_MAP_MAGIC {
            return Err(IndexlibError::index("invalid deletion map format"));
        }
        let version = reader.read_u32()?;
        if version != DELETION_MAP_VERSION {
            return Err(IndexlibError::index(format!(
                "unsupported deletion map version: {version}"
            )));
        }
        let doc_count = reader.read_u32()?;
        let deleted_count = reader.read_u32()?;
        let bytes = reader.read_bytes()?;
        reader.verify_checksum()?;

        let mut deleted = BitVec::from_bytes(&bytes);
        if deleted.len() < doc_count as usize {
            return Err(IndexlibError::index(format!(
                "deletion map holds {} bits for {doc_count} docs",
                deleted.len()
            )));
        }
        deleted.truncate(doc_count as usize);

        let counted = deleted.iter().filter(|bit| *bit).count() as u32;
        if counted != deleted_count {
            return Err(IndexlibError::index(format!(
                "deletion map header says {deleted_count} deleted, bitmap has {counted}"
            )));
        }
        Ok(DeletionMap {
            deleted,
            deleted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete() {
        let mut map = DeletionMap::new(10);
        assert!(map.delete(3).unwrap());
        assert!(!map.delete(3).unwrap());
        assert!(map.delete(10).is_err());

        assert!(map.is_deleted(3));
        assert!(!map.is_deleted(4));
        assert!(!map.is_deleted(100));
        assert_eq!(map.deleted_count(), 1);
        assert_eq!(map.live_count(), 9);
    }

    #[test]
    fn test_store_and_load() {
        let storage = MemoryStorage::new_default();
        let mut map = DeletionMap::new(13);
        map.delete(0).unwrap();
        map.delete(12).unwrap();
        map.store(&storage).unwrap();

        let loaded = DeletionMap::load(&storage).unwrap();
        assert_eq!(loaded, map);
        assert_eq!(loaded.deleted_docs().collect::<Vec<_>>(), vec![0, 12]);
    }

    #[test]
    fn test_empty_segment() {
        let storage = MemoryStorage::new_default();
        DeletionMap::new(0).store(&storage).unwrap();
        assert_eq!(DeletionMap::load(&storage).unwrap().doc_count(), 0);
    }
}
