use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::OnceLock;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::bitmap::decoder::BitmapPosting;
use crate::index::bitmap::index_writer::BitmapIndexFileWriter;
use crate::index::bitmap::posting_writer::BitmapPostingWriter;
use crate::merge::reclaim_map::ReclaimMap;

/// The posting of one term in one source segment.
#[derive(Debug, Clone)]
pub struct SegmentTermInfo {
    /// Global base docid of the source segment.
    pub base_doc_id: DocId,
    pub posting: BitmapPosting,
}

impl SegmentTermInfo {
    pub fn new(base_doc_id: DocId, posting: BitmapPosting) -> Self {
        SegmentTermInfo {
            base_doc_id,
            posting,
        }
    }
}

/// Merges the postings of one term into one writer per target segment.
#[derive(Debug)]
pub struct BitmapPostingMerger {
    writers: Vec<BitmapPostingWriter>,
    doc_freq: OnceLock<u32>,
}

impl BitmapPostingMerger {
    pub fn new(target_segment_count: usize) -> Self {
        BitmapPostingMerger {
            writers: (0..target_segment_count)
                .map(|_| BitmapPostingWriter::new())
                .collect(),
            doc_freq: OnceLock::new(),
        }
    }

    fn emit(&mut self, target: usize, local: DocId, payload: u16) -> Result<()> {
        let target_count = self.writers.len();
        let writer = self.writers.get_mut(target).ok_or_else(|| {
            IndexlibError::inconsistent(format!(
                "reclaim map sent a doc to target {target} of {target_count}"
            ))
        })?;
        if writer.last_doc_id().is_some_and(|last| local <= last) {
            return Err(IndexlibError::inconsistent(format!(
                "target {target} received docid {local} after {:?}",
                writer.last_doc_id()
            )));
        }
        writer.end_document(local, payload);
        Ok(())
    }

    /// Merge in source order. New docids must be increasing within every
    /// target, which holds whenever the reclaim map preserves docid order.
    pub fn merge(&mut self, infos: &[SegmentTermInfo], reclaim_map: &ReclaimMap) -> Result<()> {
        self.doc_freq.take();
        for info in infos {
            let payload = info.posting.payload();
            for old_local in info.posting.doc_ids() {
                let old_global = info.base_doc_id + old_local;
                if let Some((target, local)) = reclaim_map.get_new_local_id(old_global) {
                    self.emit(target, local, payload)?;
                }
            }
        }
        Ok(())
    }

    /// Merge when new docids follow a weight order: every source's mapped
    /// docids are sorted and the sources are k-way merged by new docid.
    pub fn sort_by_weight_merge(
        &mut self,
        infos: &[SegmentTermInfo],
        reclaim_map: &ReclaimMap,
    ) -> Result<()> {
        self.doc_freq.take();
        let cursors: Vec<(Vec<DocId>, u16)> = infos
            .iter()
            .map(|info| {
                let mut new_ids: Vec<DocId> = info
                    .posting
                    .doc_ids()
                    .filter_map(|old_local| reclaim_map.get_new_id(info.base_doc_id + old_local))
                    .collect();
                new_ids.sort_unstable();
                (new_ids, info.posting.payload())
            })
            .collect();

        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (cursor, (ids, _)) in cursors.iter().enumerate() {
            if let Some(&first) = ids.first() {
                heap.push(Reverse((first, cursor, 0usize)));
            }
        }
        while let Some(Reverse((new_global, cursor, pos))) = heap.pop() {
            let (ids, payload) = &cursors[cursor];
            let (target, local) = reclaim_map.get_local_id(new_global).ok_or_else(|| {
                IndexlibError::inconsistent(format!(
                    "new docid {new_global} has no target segment"
                ))
            })?;
            self.emit(target, local, *payload)?;
            if let Some(&next) = ids.get(pos + 1) {
                heap.push(Reverse((next, cursor, pos + 1)));
            }
        }
        Ok(())
    }

    /// Write the term's posting into every target that received documents.
    /// Targets left without documents get no dictionary entry.
    pub fn dump(&self, key: &str, outputs: &mut [BitmapIndexFileWriter]) -> Result<()> {
        if outputs.len() != self.writers.len() {
            return Err(IndexlibError::inconsistent(format!(
                "merger has {} targets, dump got {} outputs",
                self.writers.len(),
                outputs.len()
            )));
        }
        for (writer, output) in self.writers.iter().zip(outputs.iter_mut()) {
            if !writer.is_empty() {
                output.add_posting(key, writer)?;
            }
        }
        Ok(())
    }

    /// Total document frequency across targets, computed once.
    pub fn get_doc_freq(&self) -> u32 {
        *self
            .doc_freq
            .get_or_init(|| self.writers.iter().map(BitmapPostingWriter::doc_freq).sum())
    }

    pub fn writers(&self) -> &[BitmapPostingWriter] {
        &self.writers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::deletion::DeletionMap;

    fn posting(doc_ids: &[DocId]) -> BitmapPosting {
        let mut writer = BitmapPostingWriter::new();
        for &doc_id in doc_ids {
            writer.end_document(doc_id, 0);
        }
        let mut out = Vec::new();
        writer.dump(&mut out).unwrap();
        BitmapPosting::decode(&out).unwrap()
    }

    fn target_docs(merger: &BitmapPostingMerger) -> Vec<Vec<DocId>> {
        merger
            .writers()
            .iter()
            .map(|writer| {
                let mut out = Vec::new();
                writer.dump(&mut out).unwrap();
                BitmapPosting::decode(&out).unwrap().doc_ids().collect()
            })
            .collect()
    }

    #[test]
    fn test_two_segment_merge_with_deletion() {
        let mut deleted = DeletionMap::new(3);
        deleted.delete(1).unwrap();
        let reclaim_map = ReclaimMap::builder()
            .add_source(100, 3, Some(&deleted))
            .add_source(200, 2, None)
            .build()
            .unwrap();

        let infos = vec![
            SegmentTermInfo::new(100, posting(&[1, 2])),
            SegmentTermInfo::new(200, posting(&[0])),
        ];
        let mut merger = BitmapPostingMerger::new(1);
        merger.merge(&infos, &reclaim_map).unwrap();

        assert_eq!(target_docs(&merger), vec![vec![1, 2]]);
        assert_eq!(merger.get_doc_freq(), 2);
    }

    #[test]
    fn test_sort_by_weight_merge_same_set() {
        let weights = [0.5, 3.0, 1.0, 2.0, 4.0, 0.1];
        let reclaim_map = ReclaimMap::builder()
            .add_source(0, 3, None)
            .add_source(3, 3, None)
            .order_by_weight(|source, local| Ok(weights[source * 3 + local as usize]))
            .max_doc_count_per_segment(4)
            .build()
            .unwrap();
        let infos = vec![
            SegmentTermInfo::new(0, posting(&[0, 1, 2])),
            SegmentTermInfo::new(3, posting(&[1, 2])),
        ];

        let mut merger = BitmapPostingMerger::new(2);
        merger.sort_by_weight_merge(&infos, &reclaim_map).unwrap();

        let mut expected: Vec<DocId> = [0u32, 1, 2, 4, 5]
            .iter()
            .filter_map(|&old| reclaim_map.get_new_id(old))
            .collect();
        expected.sort_unstable();
        let produced: Vec<DocId> = target_docs(&merger)
            .iter()
            .enumerate()
            .flat_map(|(target, docs)| docs.iter().map(move |&local| target as DocId * 4 + local))
            .collect();
        assert_eq!(produced, expected);
        assert_eq!(merger.get_doc_freq(), 5);

        // Plain merge cannot follow a weight order.
        let mut plain = BitmapPostingMerger::new(2);
        assert!(matches!(
            plain.merge(&infos, &reclaim_map),
            Err(IndexlibError::InconsistentState(_))
        ));
    }

    #[test]
    fn test_all_deleted_term() {
        let reclaim_map = ReclaimMap::builder()
            .add_source(0, 2, None)
            .with_filter(|_, _| Ok(false))
            .build()
            .unwrap();
        let mut merger = BitmapPostingMerger::new(1);
        merger
            .merge(&[SegmentTermInfo::new(0, posting(&[0, 1]))], &reclaim_map)
            .unwrap();

        assert_eq!(merger.get_doc_freq(), 0);
        let storage = crate::storage::memory::MemoryStorage::new_default();
        let mut outputs = vec![BitmapIndexFileWriter::create(&storage).unwrap()];
        merger.dump("gone", &mut outputs).unwrap();
        assert_eq!(outputs[0].term_count(), 0);
    }
}
