use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::bitmap::index_reader::BitmapIndexReader;
use crate::index::bitmap::index_writer::BitmapIndexFileWriter;
use crate::index::bitmap::merger::{BitmapPostingMerger, SegmentTermInfo};
use crate::index::bitmap::{DICTIONARY_FILE, POSTING_FILE};
use crate::index::schema::{IndexConfig, Schema};
use crate::index::segment::SegmentData;
use crate::merge::reclaim_map::SegmentDocIdMap;
use crate::merge::reducer::{IndexReduceItem, IndexReducer, OutputSegment, ReduceResource, ReduceTask};
use crate::storage::{Storage, sub_storage};

/// Directory of the output of parallel task `id`, inside the index directory.
pub fn instance_dir(id: usize) -> String {
    format!("instance_{id}")
}

/// Term range `[begin, end)` handled by one parallel task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TermRange {
    begin: Option<String>,
    end: Option<String>,
}

/// Reduce item of a bitmap index: the opened index of one source segment.
#[derive(Debug, Default)]
pub struct BitmapReduceItem {
    index_name: String,
    reader: Option<BitmapIndexReader>,
    base_doc_id: DocId,
    doc_count: u32,
    remapped: bool,
}

impl BitmapReduceItem {
    fn reader(&self) -> Result<&BitmapIndexReader> {
        self.reader.as_ref().ok_or_else(|| {
            IndexlibError::inconsistent(format!(
                "bitmap index '{}' reduce item used before load",
                self.index_name
            ))
        })
    }
}

impl IndexReduceItem for BitmapReduceItem {
    fn load_index(&mut self, segment: &SegmentData) -> Result<()> {
        let storage = segment.index_storage(&self.index_name);
        self.reader = Some(BitmapIndexReader::open(storage.as_ref())?);
        self.base_doc_id = segment.base_doc_id();
        self.doc_count = segment.doc_count();
        Ok(())
    }

    fn update_doc_id(&mut self, doc_id_map: &SegmentDocIdMap<'_>) -> Result<()> {
        if doc_id_map.base_doc_id() != self.base_doc_id || doc_id_map.doc_count() != self.doc_count
        {
            return Err(IndexlibError::inconsistent(format!(
                "bitmap index '{}': segment at base {} with {} docs got a docid map for base {} with {} docs",
                self.index_name,
                self.base_doc_id,
                self.doc_count,
                doc_id_map.base_doc_id(),
                doc_id_map.doc_count()
            )));
        }
        // Postings are remapped term by term during reduce.
        self.remapped = true;
        Ok(())
    }
}

/// Merges a bitmap index term by term.
#[derive(Debug, Clone)]
pub struct BitmapIndexReducer {
    index_name: String,
}

impl BitmapIndexReducer {
    pub fn new(index_name: impl Into<String>) -> Self {
        BitmapIndexReducer {
            index_name: index_name.into(),
        }
    }

    fn output_storage(&self, output: &OutputSegment, task: Option<&ReduceTask>) -> Arc<dyn Storage> {
        let storage = output.index_storage(&self.index_name);
        match task {
            Some(task) => sub_storage(&storage, &instance_dir(task.id)),
            None => storage,
        }
    }

    fn open_source_readers(&self, segments: &[SegmentData]) -> Result<Vec<BitmapIndexReader>> {
        segments
            .iter()
            .map(|segment| BitmapIndexReader::open(segment.index_storage(&self.index_name).as_ref()))
            .collect()
    }

    /// Rebuild the final files of one output from its instance directories.
    fn join_instances(&self, index: &Arc<dyn Storage>, instance_count: usize) -> Result<()> {
        if index.file_exists(DICTIONARY_FILE) && BitmapIndexReader::open(index.as_ref()).is_ok() {
            // Joined by an earlier run; only leftovers remain.
            for id in 0..instance_count {
                index.delete_dir(&instance_dir(id))?;
            }
            return Ok(());
        }

        let mut writer = BitmapIndexFileWriter::create(index.as_ref())?;
        for id in 0..instance_count {
            let instance = sub_storage(index, &instance_dir(id));
            if !instance.file_exists(DICTIONARY_FILE) {
                return Err(IndexlibError::inconsistent(format!(
                    "bitmap index '{}' is missing the output of task {id}",
                    self.index_name
                )));
            }
            let reader = BitmapIndexReader::open(instance.as_ref())?;
            for term in reader.terms() {
                let bytes = reader.posting_bytes(term).ok_or_else(|| {
                    IndexlibError::inconsistent(format!("term '{term}' vanished from task {id}"))
                })?;
                writer.add_raw_posting(term, bytes)?;
            }
        }
        writer.close()?;

        for id in 0..instance_count {
            index.delete_dir(&instance_dir(id))?;
        }
        Ok(())
    }
}

impl IndexReducer for BitmapIndexReducer {
    type Item = BitmapReduceItem;

    fn init(&mut self, schema: &Schema) -> Result<()> {
        match schema.index(&self.index_name) {
            Some(IndexConfig::Bitmap { .. }) => Ok(()),
            Some(_) => Err(IndexlibError::schema(format!(
                "index '{}' is not a bitmap index",
                self.index_name
            ))),
            None => Err(IndexlibError::schema(format!(
                "unknown index '{}'",
                self.index_name
            ))),
        }
    }

    fn create_reduce_item(&self) -> BitmapReduceItem {
        BitmapReduceItem {
            index_name: self.index_name.clone(),
            ..Default::default()
        }
    }

    fn reduce(
        &self,
        items: &[BitmapReduceItem],
        outputs: &[OutputSegment],
        is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()> {
        let reclaim_map = resource.reclaim_map;
        if outputs.len() != reclaim_map.target_segment_count() {
            return Err(IndexlibError::inconsistent(format!(
                "bitmap index '{}': {} outputs for {} target segments",
                self.index_name,
                outputs.len(),
                reclaim_map.target_segment_count()
            )));
        }
        let range = match resource.task {
            Some(task) if !task.payload.is_empty() => serde_json::from_str(&task.payload)?,
            _ => TermRange::default(),
        };

        let mut readers = Vec::with_capacity(items.len());
        for item in items {
            if !item.remapped {
                return Err(IndexlibError::inconsistent(format!(
                    "bitmap index '{}' reduced before docid update",
                    self.index_name
                )));
            }
            readers.push((item.base_doc_id, item.reader()?));
        }

        let terms: BTreeSet<&str> = readers
            .iter()
            .flat_map(|(_, reader)| {
                reader.terms_in_range(range.begin.as_deref(), range.end.as_deref())
            })
            .collect();

        let mut file_writers = outputs
            .iter()
            .map(|output| BitmapIndexFileWriter::create(self.output_storage(output, resource.task).as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let term_counter = resource
            .counters
            .get_or_create(&format!("merge.{}.terms", self.index_name));
        for term in terms {
            let mut infos = Vec::new();
            for (base_doc_id, reader) in &readers {
                if let Some(posting) = reader.lookup(term)? {
                    infos.push(SegmentTermInfo::new(*base_doc_id, posting));
                }
            }
            let mut merger = BitmapPostingMerger::new(outputs.len());
            if is_sort_merge {
                merger.sort_by_weight_merge(&infos, reclaim_map)?;
            } else {
                merger.merge(&infos, reclaim_map)?;
            }
            if merger.get_doc_freq() > 0 {
                merger.dump(term, &mut file_writers)?;
                term_counter.increase(1);
            }
        }

        for writer in file_writers {
            writer.close()?;
        }
        Ok(())
    }

    fn estimate_memory_use(&self, segments: &[SegmentData], _is_sort_merge: bool) -> u64 {
        segments
            .iter()
            .map(|segment| {
                let storage = segment.index_storage(&self.index_name);
                storage.file_size(DICTIONARY_FILE).unwrap_or(0)
                    + storage.file_size(POSTING_FILE).unwrap_or(0)
            })
            .sum()
    }

    /// Contiguous term ranges of roughly equal posting bytes.
    fn create_reduce_tasks(
        &self,
        segments: &[SegmentData],
        instance_count: usize,
    ) -> Result<Vec<ReduceTask>> {
        let readers = self.open_source_readers(segments)?;
        let mut term_bytes: BTreeMap<&str, u64> = BTreeMap::new();
        for reader in &readers {
            for (term, length) in reader.term_sizes() {
                *term_bytes.entry(term).or_default() += length;
            }
        }
        let total: u64 = term_bytes.values().sum();
        let task_count = instance_count.clamp(1, term_bytes.len().max(1));
        let share = total.div_ceil(task_count as u64).max(1);

        let mut boundaries: Vec<(&str, u64)> = Vec::new();
        let mut accumulated = 0u64;
        let mut range_bytes = 0u64;
        for (&term, &bytes) in &term_bytes {
            if boundaries.len() + 1 < task_count
                && range_bytes > 0
                && accumulated >= share * (boundaries.len() as u64 + 1)
            {
                boundaries.push((term, range_bytes));
                range_bytes = 0;
            }
            accumulated += bytes;
            range_bytes += bytes;
        }

        let mut tasks = Vec::with_capacity(boundaries.len() + 1);
        let mut begin: Option<String> = None;
        let mut ranges: Vec<(TermRange, u64)> = Vec::new();
        for (term, bytes) in boundaries {
            ranges.push((
                TermRange {
                    begin: begin.take(),
                    end: Some(term.to_string()),
                },
                bytes,
            ));
            begin = Some(term.to_string());
        }
        ranges.push((TermRange { begin, end: None }, range_bytes));

        let range_count = ranges.len();
        for (id, (range, bytes)) in ranges.into_iter().enumerate() {
            let data_ratio = if total == 0 {
                1.0 / range_count as f64
            } else {
                bytes as f64 / total as f64
            };
            tasks.push(ReduceTask {
                id,
                data_ratio,
                resource_ids: Vec::new(),
                payload: serde_json::to_string(&range)?,
            });
        }
        log::debug!(
            "bitmap index '{}' split into {} reduce tasks over {} terms",
            self.index_name,
            tasks.len(),
            term_bytes.len()
        );
        Ok(tasks)
    }

    fn end_parallel_reduce(&self, outputs: &[OutputSegment], instance_count: usize) -> Result<()> {
        for output in outputs {
            let index = output.index_storage(&self.index_name);
            self.join_instances(&index, instance_count)?;
        }
        Ok(())
    }
}
