//! Pluggable reduce framework.
//!
//! Every index type takes part in a merge through an [`IndexReducer`]: it
//! creates one [`IndexReduceItem`] per source segment, each item loads its
//! segment and rewrites docids, and the reducer finally writes the target
//! segments from all items. [`ReduceDriver`] runs those phases in order,
//! loading and remapping items in parallel, and refuses out-of-order calls.
//!
//! ```text
//! Created -> Initialized -> Loaded -> DocIdsUpdated -> Reduced -> [EndParallelReduce] -> Done
//! ```

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::counter::CounterRegistry;
use crate::index::schema::Schema;
use crate::index::segment::{ATTRIBUTE_DIR, INDEX_DIR, SegmentData, SegmentId};
use crate::merge::reclaim_map::{ReclaimMap, SegmentDocIdMap};
use crate::storage::{Storage, sub_storage};

/// One independent slice of a reduce, for parallel merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceTask {
    pub id: usize,
    /// Estimated share of the whole reduce, in `[0, 1]`.
    pub data_ratio: f64,
    /// Shared resources the task needs; the scheduler only accounts for them.
    #[serde(default)]
    pub resource_ids: Vec<String>,
    /// Reducer-defined task description.
    #[serde(default)]
    pub payload: String,
}

impl ReduceTask {
    /// The single task covering everything.
    pub fn whole() -> Self {
        ReduceTask {
            id: 0,
            data_ratio: 1.0,
            resource_ids: Vec::new(),
            payload: String::new(),
        }
    }
}

/// A target segment being written by a merge.
#[derive(Debug, Clone)]
pub struct OutputSegment {
    pub target_index: usize,
    pub segment_id: SegmentId,
    /// Storage rooted at the target segment directory.
    pub storage: Arc<dyn Storage>,
}

impl OutputSegment {
    pub fn index_storage(&self, index_name: &str) -> Arc<dyn Storage> {
        sub_storage(&self.storage, &format!("{INDEX_DIR}/{index_name}"))
    }

    pub fn attribute_storage(&self, pack_name: &str) -> Arc<dyn Storage> {
        sub_storage(&self.storage, &format!("{ATTRIBUTE_DIR}/{pack_name}"))
    }
}

/// Read-only context handed to [`IndexReducer::reduce`].
#[derive(Clone, Copy)]
pub struct ReduceResource<'a> {
    pub reclaim_map: &'a ReclaimMap,
    pub counters: &'a CounterRegistry,
    /// The parallel task being executed, `None` for a plain merge.
    pub task: Option<&'a ReduceTask>,
}

impl fmt::Debug for ReduceResource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceResource")
            .field("total_doc_count", &self.reclaim_map.total_doc_count())
            .field("task", &self.task)
            .finish()
    }
}

/// Per-source-segment unit of merge work.
pub trait IndexReduceItem: Send {
    /// Read the index data of `segment`.
    fn load_index(&mut self, segment: &SegmentData) -> Result<()>;

    /// Rewrite document references through `doc_id_map`.
    fn update_doc_id(&mut self, doc_id_map: &SegmentDocIdMap<'_>) -> Result<()>;
}

/// Merge logic of one index type.
pub trait IndexReducer: Send + Sync {
    type Item: IndexReduceItem;

    /// Bind the reducer to the schema of the merged partitions.
    fn init(&mut self, schema: &Schema) -> Result<()>;

    fn create_reduce_item(&self) -> Self::Item;

    /// Write every target segment from the loaded, remapped `items`.
    ///
    /// With `is_sort_merge` the new docids follow a weight order, so items
    /// cannot be consumed in old docid order.
    fn reduce(
        &self,
        items: &[Self::Item],
        outputs: &[OutputSegment],
        is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()>;

    /// Rough peak memory of a reduce over `segments`, in bytes.
    fn estimate_memory_use(&self, segments: &[SegmentData], is_sort_merge: bool) -> u64;

    /// Split the reduce into at most `instance_count` independent tasks.
    fn create_reduce_tasks(
        &self,
        _segments: &[SegmentData],
        _instance_count: usize,
    ) -> Result<Vec<ReduceTask>> {
        Ok(vec![ReduceTask::whole()])
    }

    /// Join the outputs of parallel tasks. Runs once per merge and must be
    /// safe to repeat after a partial earlier run.
    fn end_parallel_reduce(&self, _outputs: &[OutputSegment], _instance_count: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceState {
    Created,
    Initialized,
    Loaded,
    DocIdsUpdated,
    Reduced,
    EndParallelReduce,
    Done,
}

/// Object-safe face of a [`ReduceDriver`], so reducers of different index
/// types can be held in one list.
pub trait DynIndexReducer: Send {
    fn index_name(&self) -> &str;

    fn state(&self) -> ReduceState;

    fn init(&mut self, schema: &Schema) -> Result<()>;

    fn load(&mut self, segments: &[SegmentData]) -> Result<()>;

    fn update_doc_ids(&mut self, reclaim_map: &ReclaimMap) -> Result<()>;

    fn reduce(
        &mut self,
        outputs: &[OutputSegment],
        is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()>;

    fn estimate_memory_use(&self, segments: &[SegmentData], is_sort_merge: bool) -> u64;

    fn create_reduce_tasks(
        &self,
        segments: &[SegmentData],
        instance_count: usize,
    ) -> Result<Vec<ReduceTask>>;

    fn end_parallel_reduce(&mut self, outputs: &[OutputSegment], instance_count: usize)
    -> Result<()>;

    /// Release the items and move to `Done`.
    fn finish(&mut self) -> Result<()>;

    /// Load, remap, reduce and finish in one go.
    fn run(
        &mut self,
        segments: &[SegmentData],
        outputs: &[OutputSegment],
        is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()> {
        self.load(segments)?;
        self.update_doc_ids(resource.reclaim_map)?;
        self.reduce(outputs, is_sort_merge, resource)?;
        self.finish()
    }
}

/// Drives one [`IndexReducer`] through its states.
pub struct ReduceDriver<R: IndexReducer> {
    index_name: String,
    reducer: R,
    items: Vec<R::Item>,
    state: ReduceState,
}

impl<R: IndexReducer + 'static> ReduceDriver<R> {
    pub fn new(index_name: impl Into<String>, reducer: R) -> Self {
        ReduceDriver {
            index_name: index_name.into(),
            reducer,
            items: Vec::new(),
            state: ReduceState::Created,
        }
    }

    pub fn boxed(index_name: impl Into<String>, reducer: R) -> Box<dyn DynIndexReducer> {
        Box::new(Self::new(index_name, reducer))
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn items(&self) -> &[R::Item] {
        &self.items
    }

    fn transition(&mut self, allowed: &[ReduceState], next: ReduceState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(IndexlibError::inconsistent(format!(
                "reducer of index '{}' cannot move from {:?} to {next:?}",
                self.index_name, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    fn check(&self, allowed: &[ReduceState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(IndexlibError::inconsistent(format!(
                "reducer of index '{}' cannot {action} in state {:?}",
                self.index_name, self.state
            )))
        }
    }
}

impl<R: IndexReducer + 'static> DynIndexReducer for ReduceDriver<R> {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    fn state(&self) -> ReduceState {
        self.state
    }

    fn init(&mut self, schema: &Schema) -> Result<()> {
        self.check(&[ReduceState::Created], "init")?;
        self.reducer.init(schema)?;
        self.transition(&[ReduceState::Created], ReduceState::Initialized)
    }

    fn load(&mut self, segments: &[SegmentData]) -> Result<()> {
        self.check(&[ReduceState::Initialized], "load")?;
        let mut items: Vec<R::Item> = segments
            .iter()
            .map(|_| self.reducer.create_reduce_item())
            .collect();
        items
            .par_iter_mut()
            .zip(segments.par_iter())
            .try_for_each(|(item, segment)| item.load_index(segment))
            .inspect_err(|e| {
                log::error!("index '{}' failed to load source segments: {e}", self.index_name)
            })?;
        self.items = items;
        self.transition(&[ReduceState::Initialized], ReduceState::Loaded)
    }

    fn update_doc_ids(&mut self, reclaim_map: &ReclaimMap) -> Result<()> {
        self.check(&[ReduceState::Loaded], "update docids")?;
        if reclaim_map.source_count() != self.items.len() {
            return Err(IndexlibError::inconsistent(format!(
                "index '{}' loaded {} segments, reclaim map covers {}",
                self.index_name,
                self.items.len(),
                reclaim_map.source_count()
            )));
        }
        self.items
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(source, item)| {
                let doc_id_map = reclaim_map.segment_doc_id_map(source).ok_or_else(|| {
                    IndexlibError::inconsistent(format!("no docid map for source {source}"))
                })?;
                item.update_doc_id(&doc_id_map)
            })?;
        self.transition(&[ReduceState::Loaded], ReduceState::DocIdsUpdated)
    }

    fn reduce(
        &mut self,
        outputs: &[OutputSegment],
        is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()> {
        self.check(&[ReduceState::DocIdsUpdated], "reduce")?;
        self.reducer
            .reduce(&self.items, outputs, is_sort_merge, resource)
            .inspect_err(|e| log::error!("index '{}' reduce failed: {e}", self.index_name))?;
        self.transition(&[ReduceState::DocIdsUpdated], ReduceState::Reduced)
    }

    fn estimate_memory_use(&self, segments: &[SegmentData], is_sort_merge: bool) -> u64 {
        self.reducer.estimate_memory_use(segments, is_sort_merge)
    }

    fn create_reduce_tasks(
        &self,
        segments: &[SegmentData],
        instance_count: usize,
    ) -> Result<Vec<ReduceTask>> {
        let tasks = self
            .reducer
            .create_reduce_tasks(segments, instance_count.max(1))?;
        if tasks.is_empty() {
            return Err(IndexlibError::inconsistent(format!(
                "index '{}' produced no reduce task",
                self.index_name
            )));
        }
        Ok(tasks)
    }

    fn end_parallel_reduce(
        &mut self,
        outputs: &[OutputSegment],
        instance_count: usize,
    ) -> Result<()> {
        self.check(
            &[ReduceState::Initialized, ReduceState::Reduced],
            "end parallel reduce",
        )?;
        self.reducer.end_parallel_reduce(outputs, instance_count)?;
        self.transition(
            &[ReduceState::Initialized, ReduceState::Reduced],
            ReduceState::EndParallelReduce,
        )
    }

    fn finish(&mut self) -> Result<()> {
        self.transition(
            &[ReduceState::Reduced, ReduceState::EndParallelReduce],
            ReduceState::Done,
        )?;
        self.items.clear();
        Ok(())
    }
}
