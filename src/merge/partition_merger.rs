//! Merging whole partitions into a destination partition.
//!
//! ```text
//! Uninitialized -> SourcesValidated -> DestPrepared -> MergerCreated -> MergeExecuting -> MergeCommitted
//! ```
//!
//! Sources are validated before anything is written, so a rejected merge
//! leaves the destination untouched.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::error::{ErrorInfo, IndexlibError, Result};
use crate::index::DocId;
use crate::index::counter::CounterRegistry;
use crate::index::partition::{PartitionDescriptor, max_segment_dir_id, open_segments};
use crate::index::segment::{SegmentData, SegmentId, SegmentInfo};
use crate::index::version::Version;
use crate::merge::config::{MergeConfig, MergeStrategyConfig, VersionTimestampPolicy};
use crate::merge::registry::ReducerRegistry;
use crate::merge::segment_merger::SegmentMerger;
use crate::merge::strategy::{MergePlanKind, create_strategy};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerState {
    Uninitialized,
    SourcesValidated,
    DestPrepared,
    MergerCreated,
    MergeExecuting,
    MergeCommitted,
}

/// Summary of a finished merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    /// Source segments across all partitions.
    pub source_segments: usize,

    /// Plans rewritten through a reclaim map.
    pub merged_plans: usize,

    /// Plans carried over unchanged.
    pub copied_plans: usize,

    /// Documents in the source segments, deleted ones included.
    pub source_docs: u64,

    /// Documents in the target segments.
    pub target_docs: u64,

    /// Segments written to the destination.
    pub target_segments: Vec<SegmentId>,

    /// Wall time of the merge (in milliseconds).
    pub merge_time_ms: u64,
}

struct SourcePartition {
    descriptor: PartitionDescriptor,
    version: Version,
    storage: Arc<dyn Storage>,
}

/// Merges several partitions of one schema into a new version of a
/// destination partition.
pub struct MultiPartitionMerger {
    sources: Vec<Arc<dyn Storage>>,
    dest: Arc<dyn Storage>,
    config: MergeConfig,
    registry: ReducerRegistry,
    counters: Arc<CounterRegistry>,
    state: MergerState,
    partitions: Vec<SourcePartition>,
    stats: MergeStats,
}

impl MultiPartitionMerger {
    pub fn new(
        sources: Vec<Arc<dyn Storage>>,
        dest: Arc<dyn Storage>,
        config: MergeConfig,
        registry: ReducerRegistry,
        counters: Arc<CounterRegistry>,
    ) -> Self {
        MultiPartitionMerger {
            sources,
            dest,
            config,
            registry,
            counters,
            state: MergerState::Uninitialized,
            partitions: Vec::new(),
            stats: MergeStats::default(),
        }
    }

    pub fn state(&self) -> MergerState {
        self.state
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<CounterRegistry> {
        &self.counters
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    fn expect_state(&self, expected: MergerState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(IndexlibError::inconsistent(format!(
                "cannot {action} in merger state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn descriptor(&self) -> Result<&PartitionDescriptor> {
        self.partitions
            .first()
            .map(|p| &p.descriptor)
            .ok_or_else(|| IndexlibError::inconsistent("merger has no validated source"))
    }

    /// Validate sources, prepare the destination and check that a reducer
    /// exists for every index.
    pub fn init(&mut self) -> Result<()> {
        self.expect_state(MergerState::Uninitialized, "init")?;
        self.config.validate()?;
        self.validate_sources()?;
        self.state = MergerState::SourcesValidated;

        self.descriptor()?.prepare(self.dest.as_ref())?;
        self.state = MergerState::DestPrepared;

        let descriptor = self.descriptor()?;
        SegmentMerger::new(
            &descriptor.schema,
            &descriptor.meta,
            &self.registry,
            &self.counters,
        )
        .check_reducers()?;
        self.adjust_strategy();
        self.state = MergerState::MergerCreated;
        Ok(())
    }

    fn validate_sources(&mut self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(IndexlibError::config("merge needs at least one source partition"));
        }
        let mut partitions: Vec<SourcePartition> = Vec::with_capacity(self.sources.len());
        for (index, storage) in self.sources.iter().enumerate() {
            let descriptor = PartitionDescriptor::load(storage.as_ref())?;
            descriptor.schema.validate()?;
            if let Some(first) = partitions.first() {
                first
                    .descriptor
                    .check_compatible(&descriptor, &format!("source partition {index}"))?;
            }
            let version = Version::load_latest(storage.as_ref())?.ok_or_else(|| {
                IndexlibError::index(format!("source partition {index} has no committed version"))
            })?;
            partitions.push(SourcePartition {
                descriptor,
                version,
                storage: Arc::clone(storage),
            });
        }
        log::info!("validated {} source partitions", partitions.len());
        self.partitions = partitions;
        Ok(())
    }

    /// A filtered merge must re-examine every document.
    fn adjust_strategy(&mut self) {
        if self.config.filter.is_none() {
            return;
        }
        let forced = match &self.config.strategy {
            MergeStrategyConfig::Optimize {
                max_doc_count_per_segment,
                skip_single_merged_segment: true,
            } => MergeStrategyConfig::Optimize {
                max_doc_count_per_segment: *max_doc_count_per_segment,
                skip_single_merged_segment: false,
            },
            MergeStrategyConfig::Optimize { .. } => return,
            MergeStrategyConfig::Balance { .. } => MergeStrategyConfig::Optimize {
                max_doc_count_per_segment: None,
                skip_single_merged_segment: false,
            },
        };
        log::warn!(
            "filtered merge: strategy {:?} forced to {forced:?}",
            self.config.strategy
        );
        self.config.strategy = forced;
    }

    /// Open the segments of every source version, addressed consecutively.
    fn open_source_segments(&self) -> Result<Vec<SegmentData>> {
        let mut segments = Vec::new();
        let mut base: DocId = 0;
        for partition in &self.partitions {
            for segment in open_segments(&partition.storage, &partition.version)? {
                let doc_count = segment.doc_count();
                segments.push(segment.with_base_doc_id(base));
                base = base.checked_add(doc_count).ok_or_else(|| {
                    IndexlibError::invalid_argument("source partitions exceed the docid space")
                })?;
            }
        }
        Ok(segments)
    }

    fn assemble_version(&self, version_id: u32, infos: &[SegmentInfo]) -> Version {
        let source = match self.config.version_timestamp_policy {
            VersionTimestampPolicy::FirstSource => self.partitions.first(),
            VersionTimestampPolicy::Latest => self.partitions.iter().max_by_key(|p| p.version.timestamp),
        };
        Version {
            version_id,
            segment_ids: infos.iter().map(|info| info.segment_id).collect(),
            timestamp: source.map_or(0, |p| p.version.timestamp),
            locator: source.map(|p| p.version.locator.clone()).unwrap_or_default(),
            shard_count: self
                .partitions
                .iter()
                .map(|p| p.version.shard_count)
                .max()
                .unwrap_or(1),
        }
    }

    /// Run the merge and commit `version_id` in the destination.
    pub fn merge(&mut self, version_id: u32) -> Result<Version> {
        self.expect_state(MergerState::MergerCreated, "merge")?;
        if self.dest.file_exists(&Version::file_name(version_id)) {
            return Err(IndexlibError::invalid_argument(format!(
                "destination already has version {version_id}"
            )));
        }
        self.state = MergerState::MergeExecuting;
        let start = Instant::now();

        let segments = self.open_source_segments()?;
        let task = create_strategy(&self.config.strategy).create_task(&segments)?;
        let descriptor = self.descriptor()?;
        let merger = SegmentMerger::new(
            &descriptor.schema,
            &descriptor.meta,
            &self.registry,
            &self.counters,
        )
        .with_filter(self.config.filter.as_ref());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel.thread_count)
            .build()
            .map_err(|e| IndexlibError::runtime(format!("cannot start merge threads: {e}")))?;

        let mut next_segment_id = max_segment_dir_id(self.dest.as_ref())?.map_or(0, |id| id + 1);
        let mut infos: Vec<SegmentInfo> = Vec::new();
        let mut stats = MergeStats {
            source_segments: segments.len(),
            source_docs: segments.iter().map(|s| s.doc_count() as u64).sum(),
            ..Default::default()
        };
        let instance_count = self.config.parallel.instance_count;
        for plan in &task.plans {
            let plan_infos = match plan.kind {
                MergePlanKind::Copy => {
                    stats.copied_plans += 1;
                    let info = merger.copy_segment(&segments[plan.sources[0]], &self.dest, next_segment_id)?;
                    vec![info]
                }
                MergePlanKind::Merge => {
                    stats.merged_plans += 1;
                    let mut sources: Vec<SegmentData> = Vec::with_capacity(plan.sources.len());
                    let mut base: DocId = 0;
                    for &index in &plan.sources {
                        let segment = segments[index].clone().with_base_doc_id(base);
                        base += segment.doc_count();
                        sources.push(segment);
                    }
                    pool.install(|| {
                        if instance_count > 1 {
                            merger.merge_plan_parallel(
                                &sources,
                                &self.dest,
                                next_segment_id,
                                plan.max_doc_count_per_segment,
                                instance_count,
                            )
                        } else {
                            merger.merge_plan(
                                &sources,
                                &self.dest,
                                next_segment_id,
                                plan.max_doc_count_per_segment,
                            )
                        }
                    })?
                }
            };
            next_segment_id += plan_infos.len() as SegmentId;
            infos.extend(plan_infos);
        }

        let version = self.assemble_version(version_id, &infos);
        version.store(self.dest.as_ref())?;
        self.dest.sync()?;

        stats.target_docs = infos.iter().map(|info| info.doc_count as u64).sum();
        stats.target_segments = version.segment_ids.clone();
        stats.merge_time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "committed merged version {version_id}: {} segments, {} of {} docs kept in {} ms",
            stats.target_segments.len(),
            stats.target_docs,
            stats.source_docs,
            stats.merge_time_ms
        );
        self.stats = stats;
        self.state = MergerState::MergeCommitted;
        Ok(version)
    }

    /// Init and merge, reporting failure the way a merge task does.
    pub fn run(&mut self, version_id: u32) -> std::result::Result<Version, ErrorInfo> {
        let result = if self.state == MergerState::Uninitialized {
            self.init().and_then(|()| self.merge(version_id))
        } else {
            self.merge(version_id)
        };
        result.map_err(|e| {
            log::error!("merge into version {version_id} failed: {e}");
            e.error_info()
        })
    }
}
