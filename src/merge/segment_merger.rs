//! Executes merge plans against one destination partition.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::attribute::PackAttributeReducer;
use crate::index::bitmap::BitmapIndexReducer;
use crate::index::counter::CounterRegistry;
use crate::index::deletion::DeletionMap;
use crate::index::schema::{IndexConfig, Schema};
use crate::index::segment::{SEGMENT_INFO_FILE, SegmentData, SegmentId, SegmentInfo, segment_dir_name};
use crate::index::version::{PartitionMeta, SortOrder};
use crate::merge::config::RangeFilterConfig;
use crate::merge::filter::{AttributeLookup, AttributeRangeFilter, MergeDocFilter};
use crate::merge::reclaim_map::ReclaimMap;
use crate::merge::reducer::{DynIndexReducer, OutputSegment, ReduceDriver, ReduceResource, ReduceTask};
use crate::merge::registry::ReducerRegistry;
use crate::storage::{Storage, sub_storage};

/// What a reducer merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ReduceTarget {
    Index(String),
    Attribute(String),
}

impl ReduceTarget {
    pub fn name(&self) -> &str {
        match self {
            ReduceTarget::Index(name) | ReduceTarget::Attribute(name) => name,
        }
    }
}

/// One reduce task of one index, schedulable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelMergeItem {
    pub id: usize,
    pub target: ReduceTarget,
    pub task: ReduceTask,
}

/// A merge plan whose reclaim map and target segments are fixed.
#[derive(Debug)]
pub struct PreparedPlan {
    pub reclaim_map: ReclaimMap,
    pub outputs: Vec<OutputSegment>,
}

/// Runs the reducers of every index and pack attribute of a schema.
pub struct SegmentMerger<'a> {
    schema: &'a Schema,
    meta: &'a PartitionMeta,
    registry: &'a ReducerRegistry,
    counters: &'a CounterRegistry,
    filter: Option<&'a RangeFilterConfig>,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(
        schema: &'a Schema,
        meta: &'a PartitionMeta,
        registry: &'a ReducerRegistry,
        counters: &'a CounterRegistry,
    ) -> Self {
        SegmentMerger {
            schema,
            meta,
            registry,
            counters,
            filter: None,
        }
    }

    /// Drop documents outside `filter` from every merge plan.
    pub fn with_filter(mut self, filter: Option<&'a RangeFilterConfig>) -> Self {
        self.filter = filter;
        self
    }

    /// Every index and pack attribute of the schema.
    pub fn reduce_targets(&self) -> Vec<ReduceTarget> {
        self.schema
            .indexes
            .iter()
            .map(|index| ReduceTarget::Index(index.name().to_string()))
            .chain(
                self.schema
                    .pack_attributes
                    .iter()
                    .map(|pack| ReduceTarget::Attribute(pack.name.clone())),
            )
            .collect()
    }

    /// A fresh, initialised reducer for `target`.
    pub fn create_reducer(&self, target: &ReduceTarget) -> Result<Box<dyn DynIndexReducer>> {
        let mut reducer = match target {
            ReduceTarget::Index(name) => match self.schema.index(name) {
                Some(IndexConfig::Bitmap { .. }) => {
                    ReduceDriver::boxed(name.clone(), BitmapIndexReducer::new(name.clone()))
                }
                Some(config @ IndexConfig::Customized { .. }) => self.registry.create_reducer(config)?,
                None => return Err(IndexlibError::schema(format!("unknown index '{name}'"))),
            },
            ReduceTarget::Attribute(name) => {
                ReduceDriver::boxed(name.clone(), PackAttributeReducer::new(name.clone()))
            }
        };
        reducer.init(self.schema)?;
        Ok(reducer)
    }

    /// Check every reducer can be created before anything is written.
    pub fn check_reducers(&self) -> Result<()> {
        for target in self.reduce_targets() {
            self.create_reducer(&target)?;
        }
        Ok(())
    }

    /// Reclaim map of `sources`, sorted by the partition's first sort key
    /// and filtered when configured.
    pub fn build_reclaim_map(
        &self,
        sources: &[SegmentData],
        max_doc_count_per_segment: Option<u32>,
    ) -> Result<ReclaimMap> {
        let filter = match self.filter {
            Some(config) => Some(AttributeRangeFilter::open(config, self.schema, sources)?),
            None => None,
        };
        let sort = match self.meta.sort_descriptions.first() {
            Some(description) => Some((
                AttributeLookup::open_numeric(self.schema, &description.field, sources)?,
                description.order,
            )),
            None => None,
        };

        let mut builder = ReclaimMap::builder().add_segments(sources);
        if let Some(filter) = &filter {
            builder = builder.with_filter(move |source, local| filter.keep(source, local));
        }
        if let Some((lookup, order)) = &sort {
            let order = *order;
            builder = builder.order_by_weight(move |source, local| {
                Ok(match lookup.numeric(source, local)? {
                    Some(value) if order == SortOrder::Ascending => -value,
                    Some(value) => value,
                    None => f64::NEG_INFINITY,
                })
            });
        }
        if let Some(max) = max_doc_count_per_segment {
            builder = builder.max_doc_count_per_segment(max);
        }
        builder.build()
    }

    /// Fix the reclaim map and target segments of a merge plan. Target
    /// segments get consecutive ids from `first_segment_id`; a plan without
    /// surviving documents has none.
    pub fn prepare_plan(
        &self,
        sources: &[SegmentData],
        dest: &Arc<dyn Storage>,
        first_segment_id: SegmentId,
        max_doc_count_per_segment: Option<u32>,
    ) -> Result<PreparedPlan> {
        let reclaim_map = self.build_reclaim_map(sources, max_doc_count_per_segment)?;
        let outputs = if reclaim_map.total_doc_count() == 0 {
            Vec::new()
        } else {
            (0..reclaim_map.target_segment_count())
                .map(|target_index| {
                    let segment_id = first_segment_id + target_index as SegmentId;
                    OutputSegment {
                        target_index,
                        segment_id,
                        storage: sub_storage(dest, &segment_dir_name(segment_id)),
                    }
                })
                .collect()
        };
        log::info!(
            "merge plan over {} segments: {} docs kept, {} dropped, {} target segments",
            sources.len(),
            reclaim_map.total_doc_count(),
            reclaim_map.deleted_doc_count(),
            outputs.len()
        );
        Ok(PreparedPlan {
            reclaim_map,
            outputs,
        })
    }

    fn resource<'r>(&'r self, plan: &'r PreparedPlan, task: Option<&'r ReduceTask>) -> ReduceResource<'r> {
        ReduceResource {
            reclaim_map: &plan.reclaim_map,
            counters: self.counters,
            task,
        }
    }

    /// Run every reducer over a prepared plan, in parallel.
    pub fn reduce_plan(&self, sources: &[SegmentData], plan: &PreparedPlan) -> Result<()> {
        if plan.outputs.is_empty() {
            return Ok(());
        }
        let mut reducers = self
            .reduce_targets()
            .iter()
            .map(|target| self.create_reducer(target))
            .collect::<Result<Vec<_>>>()?;
        let is_sort_merge = plan.reclaim_map.is_sorted_by_weight();
        let memory: u64 = reducers
            .iter()
            .map(|r| r.estimate_memory_use(sources, is_sort_merge))
            .sum();
        log::debug!("reducing {} indexes, estimated memory {memory} bytes", reducers.len());

        let resource = self.resource(plan, None);
        reducers
            .par_iter_mut()
            .try_for_each(|reducer| reducer.run(sources, &plan.outputs, is_sort_merge, &resource))
    }

    /// Split every reducer's work into at most `instance_count` tasks.
    pub fn create_parallel_merge_items(
        &self,
        sources: &[SegmentData],
        instance_count: usize,
    ) -> Result<Vec<ParallelMergeItem>> {
        let mut items = Vec::new();
        for target in self.reduce_targets() {
            let reducer = self.create_reducer(&target)?;
            for task in reducer.create_reduce_tasks(sources, instance_count)? {
                items.push(ParallelMergeItem {
                    id: items.len(),
                    target: target.clone(),
                    task,
                });
            }
        }
        let total_ratio: f64 = items.iter().map(|item| item.task.data_ratio).sum();
        log::info!(
            "created {} parallel merge items (data ratio sum {total_ratio:.2})",
            items.len()
        );
        Ok(items)
    }

    /// Run `items` in parallel, each with its own reducer.
    pub fn execute_parallel_merge_items(
        &self,
        sources: &[SegmentData],
        plan: &PreparedPlan,
        items: &[ParallelMergeItem],
    ) -> Result<()> {
        if plan.outputs.is_empty() {
            return Ok(());
        }
        let is_sort_merge = plan.reclaim_map.is_sorted_by_weight();
        items.par_iter().try_for_each(|item| {
            let mut reducer = self.create_reducer(&item.target)?;
            let resource = self.resource(plan, Some(&item.task));
            log::debug!(
                "executing merge item {} ({} task {})",
                item.id,
                item.target.name(),
                item.task.id
            );
            reducer.run(sources, &plan.outputs, is_sort_merge, &resource)
        })
    }

    /// Join parallel outputs: one call per index with its task count.
    pub fn end_parallel_reduce(&self, plan: &PreparedPlan, items: &[ParallelMergeItem]) -> Result<()> {
        if plan.outputs.is_empty() {
            return Ok(());
        }
        let mut task_counts: BTreeMap<&ReduceTarget, usize> = BTreeMap::new();
        for item in items {
            *task_counts.entry(&item.target).or_default() += 1;
        }
        for (target, task_count) in task_counts {
            let mut reducer = self.create_reducer(target)?;
            reducer.end_parallel_reduce(&plan.outputs, task_count)?;
        }
        Ok(())
    }

    /// Write segment infos and empty deletion maps of the plan's targets.
    pub fn finish_plan(&self, sources: &[SegmentData], plan: &PreparedPlan) -> Result<Vec<SegmentInfo>> {
        let newest = sources.iter().max_by_key(|s| s.info().timestamp);
        let timestamp = newest.map_or(0, |s| s.info().timestamp);
        let locator = newest.map(|s| s.info().locator.clone()).unwrap_or_default();

        let mut infos = Vec::with_capacity(plan.outputs.len());
        for output in &plan.outputs {
            let doc_count = plan.reclaim_map.target_segment_doc_count(output.target_index);
            DeletionMap::new(doc_count).store(output.storage.as_ref())?;
            let info = SegmentInfo {
                segment_id: output.segment_id,
                doc_count,
                timestamp,
                locator: locator.clone(),
                merged: true,
            };
            info.store(output.storage.as_ref())?;
            infos.push(info);
        }
        self.counters
            .get_or_create("merge.docs")
            .increase(plan.reclaim_map.total_doc_count() as u64);
        Ok(infos)
    }

    /// Merge `sources` into new segments of `dest`.
    pub fn merge_plan(
        &self,
        sources: &[SegmentData],
        dest: &Arc<dyn Storage>,
        first_segment_id: SegmentId,
        max_doc_count_per_segment: Option<u32>,
    ) -> Result<Vec<SegmentInfo>> {
        let plan = self.prepare_plan(sources, dest, first_segment_id, max_doc_count_per_segment)?;
        self.reduce_plan(sources, &plan)?;
        self.finish_plan(sources, &plan)
    }

    /// [`merge_plan`](Self::merge_plan) with every reducer split into up to
    /// `instance_count` parallel items.
    pub fn merge_plan_parallel(
        &self,
        sources: &[SegmentData],
        dest: &Arc<dyn Storage>,
        first_segment_id: SegmentId,
        max_doc_count_per_segment: Option<u32>,
        instance_count: usize,
    ) -> Result<Vec<SegmentInfo>> {
        let plan = self.prepare_plan(sources, dest, first_segment_id, max_doc_count_per_segment)?;
        let items = self.create_parallel_merge_items(sources, instance_count)?;
        self.execute_parallel_merge_items(sources, &plan, &items)?;
        self.end_parallel_reduce(&plan, &items)?;
        self.finish_plan(sources, &plan)
    }

    /// Carry `source` over into `dest` as segment `segment_id`.
    pub fn copy_segment(
        &self,
        source: &SegmentData,
        dest: &Arc<dyn Storage>,
        segment_id: SegmentId,
    ) -> Result<SegmentInfo> {
        let target = sub_storage(dest, &segment_dir_name(segment_id));
        for name in source.storage().list_files()? {
            if name == SEGMENT_INFO_FILE {
                continue;
            }
            let data = source.storage().read_all(&name)?;
            target.write_file(&name, &data)?;
        }
        source.deletion_map().store(target.as_ref())?;
        let info = SegmentInfo {
            segment_id,
            ..source.info().clone()
        };
        info.store(target.as_ref())?;
        log::info!(
            "copied segment {} as segment {segment_id}",
            source.segment_id()
        );
        Ok(info)
    }
}
