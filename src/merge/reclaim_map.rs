//! Docid remapping computed once per merge.
//!
//! Sources are addressed by global docid: a source segment occupies
//! `[base, base + doc_count)`, and sources may leave gaps between each other.
//! Every live source document receives a new global docid in `0..total`;
//! new ids are then cut into target segments of at most
//! `max_doc_count_per_segment` documents.

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::deletion::DeletionMap;
use crate::index::segment::SegmentData;

const INVALID_DOC_ID: DocId = DocId::MAX;

type KeepFn<'a> = Box<dyn FnMut(usize, DocId) -> Result<bool> + 'a>;
type WeightFn<'a> = Box<dyn FnMut(usize, DocId) -> Result<f64> + 'a>;

#[derive(Debug, Clone)]
struct SourceSegment {
    base_doc_id: DocId,
    doc_count: u32,
    /// Start of this source's entries in `ReclaimMap::new_ids`.
    offset: usize,
}

/// Builder for a [`ReclaimMap`].
pub struct ReclaimMapBuilder<'a> {
    sources: Vec<(DocId, u32, Option<&'a DeletionMap>)>,
    keep: Option<KeepFn<'a>>,
    weight: Option<WeightFn<'a>>,
    max_doc_count_per_segment: Option<u32>,
}

impl Default for ReclaimMapBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ReclaimMapBuilder<'a> {
    pub fn new() -> Self {
        ReclaimMapBuilder {
            sources: Vec::new(),
            keep: None,
            weight: None,
            max_doc_count_per_segment: None,
        }
    }

    /// Add a source segment. Sources must be added in increasing base order.
    pub fn add_source(
        mut self,
        base_doc_id: DocId,
        doc_count: u32,
        deletion_map: Option<&'a DeletionMap>,
    ) -> Self {
        self.sources.push((base_doc_id, doc_count, deletion_map));
        self
    }

    /// Add every segment of `segments` with its deletion map.
    pub fn add_segments(mut self, segments: &'a [SegmentData]) -> Self {
        for segment in segments {
            self = self.add_source(
                segment.base_doc_id(),
                segment.doc_count(),
                Some(segment.deletion_map()),
            );
        }
        self
    }

    /// Drop live documents for which `keep(source, local_doc_id)` is false.
    pub fn with_filter(mut self, keep: impl FnMut(usize, DocId) -> Result<bool> + 'a) -> Self {
        self.keep = Some(Box::new(keep));
        self
    }

    /// Number documents by descending weight instead of encounter order.
    /// Ties keep encounter order.
    pub fn order_by_weight(
        mut self,
        weight: impl FnMut(usize, DocId) -> Result<f64> + 'a,
    ) -> Self {
        self.weight = Some(Box::new(weight));
        self
    }

    /// Split the new docid space into target segments of at most `max` docs.
    pub fn max_doc_count_per_segment(mut self, max: u32) -> Self {
        self.max_doc_count_per_segment = Some(max);
        self
    }

    pub fn build(self) -> Result<ReclaimMap> {
        let ReclaimMapBuilder {
            sources,
            mut keep,
            mut weight,
            max_doc_count_per_segment,
        } = self;

        if max_doc_count_per_segment == Some(0) {
            return Err(IndexlibError::config(
                "max_doc_count_per_segment must be positive",
            ));
        }

        let mut segments = Vec::with_capacity(sources.len());
        let mut offset = 0usize;
        let mut next_free: u64 = 0;
        for (index, &(base_doc_id, doc_count, deletion_map)) in sources.iter().enumerate() {
            if (base_doc_id as u64) < next_free {
                return Err(IndexlibError::invalid_argument(format!(
                    "reclaim source {index} at base {base_doc_id} overlaps the previous source"
                )));
            }
            if let Some(map) = deletion_map {
                if map.doc_count() != doc_count {
                    return Err(IndexlibError::inconsistent(format!(
                        "reclaim source {index} has {doc_count} docs but its deletion map covers {}",
                        map.doc_count()
                    )));
                }
            }
            next_free = base_doc_id as u64 + doc_count as u64;
            if next_free > INVALID_DOC_ID as u64 {
                return Err(IndexlibError::invalid_argument(
                    "reclaim sources exceed the docid space",
                ));
            }
            segments.push(SourceSegment {
                base_doc_id,
                doc_count,
                offset,
            });
            offset += doc_count as usize;
        }

        // Live documents in encounter order: (flat index, weight).
        let mut live: Vec<(usize, f64)> = Vec::new();
        for (index, &(_, doc_count, deletion_map)) in sources.iter().enumerate() {
            for local in 0..doc_count {
                if deletion_map.is_some_and(|map| map.is_deleted(local)) {
                    continue;
                }
                if let Some(keep) = keep.as_mut() {
                    if !keep(index, local)? {
                        continue;
                    }
                }
                let w = match weight.as_mut() {
                    Some(weight) => weight(index, local)?,
                    None => 0.0,
                };
                live.push((segments[index].offset + local as usize, w));
            }
        }
        let sort_by_weight = weight.is_some();
        if sort_by_weight {
            // Stable: equal weights keep ascending old docids.
            live.sort_by(|a, b| b.1.total_cmp(&a.1));
        }

        let mut new_ids = vec![INVALID_DOC_ID; offset];
        let mut old_ids = Vec::with_capacity(live.len());
        for (new_id, &(flat, _)) in live.iter().enumerate() {
            new_ids[flat] = new_id as DocId;
            old_ids.push(flat);
        }

        let total = live.len() as u32;
        let mut target_bases = Vec::new();
        match max_doc_count_per_segment {
            Some(max) if total > 0 => {
                let mut base = 0u32;
                while base < total {
                    target_bases.push(base);
                    base = base.saturating_add(max);
                }
            }
            _ => target_bases.push(0),
        }

        let old_ids = old_ids
            .into_iter()
            .map(|flat| flat_to_global(&segments, flat))
            .collect();

        Ok(ReclaimMap {
            segments,
            new_ids,
            old_ids,
            target_bases,
            total_doc_count: total,
            sort_by_weight,
        })
    }
}

fn flat_to_global(segments: &[SourceSegment], flat: usize) -> DocId {
    let index = segments.partition_point(|s| s.offset <= flat) - 1;
    let segment = &segments[index];
    segment.base_doc_id + (flat - segment.offset) as DocId
}

/// Immutable old-docid to new-docid mapping shared by all reducers of a merge.
#[derive(Debug, Clone)]
pub struct ReclaimMap {
    segments: Vec<SourceSegment>,
    new_ids: Vec<DocId>,
    old_ids: Vec<DocId>,
    target_bases: Vec<DocId>,
    total_doc_count: u32,
    sort_by_weight: bool,
}

impl ReclaimMap {
    pub fn builder<'a>() -> ReclaimMapBuilder<'a> {
        ReclaimMapBuilder::new()
    }

    fn locate(&self, old_global: DocId) -> Option<(usize, DocId)> {
        let index = self
            .segments
            .partition_point(|s| s.base_doc_id <= old_global)
            .checked_sub(1)?;
        let segment = &self.segments[index];
        let local = old_global - segment.base_doc_id;
        (local < segment.doc_count).then_some((index, local))
    }

    fn new_id_at(&self, source: usize, local: DocId) -> Option<DocId> {
        let segment = self.segments.get(source)?;
        if local >= segment.doc_count {
            return None;
        }
        let id = self.new_ids[segment.offset + local as usize];
        (id != INVALID_DOC_ID).then_some(id)
    }

    /// New global docid of `old_global`; `None` if it was deleted, filtered
    /// or is not covered by any source.
    pub fn get_new_id(&self, old_global: DocId) -> Option<DocId> {
        let (source, local) = self.locate(old_global)?;
        self.new_id_at(source, local)
    }

    /// Target segment and local docid of a new global docid.
    pub fn get_local_id(&self, new_global: DocId) -> Option<(usize, DocId)> {
        if new_global >= self.total_doc_count {
            return None;
        }
        let target = self.target_bases.partition_point(|&b| b <= new_global) - 1;
        Some((target, new_global - self.target_bases[target]))
    }

    /// Target segment and local docid of an old global docid.
    pub fn get_new_local_id(&self, old_global: DocId) -> Option<(usize, DocId)> {
        self.get_local_id(self.get_new_id(old_global)?)
    }

    /// Old global docid that received `new_global`.
    pub fn get_old_id(&self, new_global: DocId) -> Option<DocId> {
        self.old_ids.get(new_global as usize).copied()
    }

    pub fn total_doc_count(&self) -> u32 {
        self.total_doc_count
    }

    pub fn target_segment_count(&self) -> usize {
        self.target_bases.len()
    }

    pub fn target_segment_doc_count(&self, target: usize) -> u32 {
        match self.target_bases.get(target) {
            Some(&base) => {
                let end = self
                    .target_bases
                    .get(target + 1)
                    .copied()
                    .unwrap_or(self.total_doc_count);
                end - base
            }
            None => 0,
        }
    }

    /// Documents of all sources that did not survive.
    pub fn deleted_doc_count(&self) -> u32 {
        self.new_ids.len() as u32 - self.total_doc_count
    }

    pub fn source_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether new docids follow a weight order rather than docid order.
    pub fn is_sorted_by_weight(&self) -> bool {
        self.sort_by_weight
    }

    /// Local view for source segment `source`.
    pub fn segment_doc_id_map(&self, source: usize) -> Option<SegmentDocIdMap<'_>> {
        (source < self.segments.len()).then_some(SegmentDocIdMap { map: self, source })
    }
}

/// The reclaim map seen from one source segment, keyed by old local docid.
#[derive(Debug, Clone, Copy)]
pub struct SegmentDocIdMap<'a> {
    map: &'a ReclaimMap,
    source: usize,
}

impl SegmentDocIdMap<'_> {
    pub fn source_index(&self) -> usize {
        self.source
    }

    pub fn base_doc_id(&self) -> DocId {
        self.map.segments[self.source].base_doc_id
    }

    pub fn doc_count(&self) -> u32 {
        self.map.segments[self.source].doc_count
    }

    /// New global docid of `old_local`.
    pub fn new_global_id(&self, old_local: DocId) -> Option<DocId> {
        self.map.new_id_at(self.source, old_local)
    }

    /// Target segment and local docid of `old_local`.
    pub fn new_local_id(&self, old_local: DocId) -> Option<(usize, DocId)> {
        self.map.get_local_id(self.new_global_id(old_local)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deletions(doc_count: u32, deleted: &[DocId]) -> DeletionMap {
        let mut map = DeletionMap::new(doc_count);
        for &doc in deleted {
            map.delete(doc).unwrap();
        }
        map
    }

    #[test]
    fn test_two_segments_with_deletion() {
        let a = deletions(3, &[1]);
        let map = ReclaimMap::builder()
            .add_source(100, 3, Some(&a))
            .add_source(200, 2, None)
            .build()
            .unwrap();

        assert_eq!(map.get_new_id(100), Some(0));
        assert_eq!(map.get_new_id(101), None);
        assert_eq!(map.get_new_id(102), Some(1));
        assert_eq!(map.get_new_id(200), Some(2));
        assert_eq!(map.get_new_id(201), Some(3));
        assert_eq!(map.get_new_id(150), None);
        assert_eq!(map.get_new_id(99), None);
        assert_eq!(map.total_doc_count(), 4);
        assert_eq!(map.deleted_doc_count(), 1);
        assert_eq!(map.get_old_id(2), Some(200));
    }

    #[test]
    fn test_targets_are_dense_partitions() {
        let map = ReclaimMap::builder()
            .add_source(0, 7, None)
            .add_source(7, 4, None)
            .max_doc_count_per_segment(4)
            .build()
            .unwrap();

        assert_eq!(map.target_segment_count(), 3);
        let counts: Vec<u32> = (0..3).map(|t| map.target_segment_doc_count(t)).collect();
        assert_eq!(counts, vec![4, 4, 3]);

        let mut seen = vec![Vec::new(); 3];
        for new_id in 0..map.total_doc_count() {
            let (target, local) = map.get_local_id(new_id).unwrap();
            seen[target].push(local);
        }
        for (target, locals) in seen.iter().enumerate() {
            let expected: Vec<DocId> = (0..map.target_segment_doc_count(target)).collect();
            assert_eq!(locals, &expected);
        }
        assert_eq!(map.get_local_id(11), None);
        assert_eq!(map.get_new_local_id(9), Some((2, 1)));
    }

    #[test]
    fn test_order_by_weight() {
        let weights = [1.0, 5.0, 3.0, 5.0];
        let map = ReclaimMap::builder()
            .add_source(0, 2, None)
            .add_source(2, 2, None)
            .order_by_weight(|source, local| Ok(weights[source * 2 + local as usize]))
            .build()
            .unwrap();

        assert!(map.is_sorted_by_weight());
        assert_eq!(map.get_new_id(1), Some(0));
        assert_eq!(map.get_new_id(3), Some(1));
        assert_eq!(map.get_new_id(2), Some(2));
        assert_eq!(map.get_new_id(0), Some(3));
    }

    #[test]
    fn test_filter_drops_documents() {
        let map = ReclaimMap::builder()
            .add_source(0, 4, None)
            .with_filter(|_, local| Ok(local % 2 == 0))
            .build()
            .unwrap();

        assert_eq!(map.total_doc_count(), 2);
        assert_eq!(map.get_new_id(2), Some(1));
        assert_eq!(map.get_new_id(3), None);
    }

    #[test]
    fn test_segment_doc_id_map() {
        let a = deletions(2, &[0]);
        let map = ReclaimMap::builder()
            .add_source(10, 2, Some(&a))
            .add_source(20, 3, None)
            .max_doc_count_per_segment(2)
            .build()
            .unwrap();

        let second = map.segment_doc_id_map(1).unwrap();
        assert_eq!(second.base_doc_id(), 20);
        assert_eq!(second.doc_count(), 3);
        assert_eq!(second.new_global_id(0), Some(1));
        assert_eq!(second.new_local_id(1), Some((1, 0)));
        assert_eq!(second.new_local_id(3), None);
        assert!(map.segment_doc_id_map(2).is_none());
    }

    #[test]
    fn test_invalid_sources() {
        assert!(ReclaimMap::builder()
            .add_source(0, 5, None)
            .add_source(3, 1, None)
            .build()
            .is_err());

        let map = DeletionMap::new(4);
        assert!(ReclaimMap::builder().add_source(0, 3, Some(&map)).build().is_err());
        assert!(ReclaimMap::builder()
            .add_source(0, 3, None)
            .max_doc_count_per_segment(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_everything_deleted() {
        let map = ReclaimMap::builder()
            .add_source(0, 2, None)
            .with_filter(|_, _| Ok(false))
            .max_doc_count_per_segment(10)
            .build()
            .unwrap();

        assert_eq!(map.total_doc_count(), 0);
        assert_eq!(map.target_segment_count(), 1);
        assert_eq!(map.target_segment_doc_count(0), 0);
        assert_eq!(map.get_local_id(0), None);
    }
}
