//! Segment merge machinery.
//!
//! A merge computes one [`ReclaimMap`] per plan from the deletion maps of
//! its source segments, then hands it to one reducer per index and pack
//! attribute. Reducers run independently and share nothing but the map and
//! the read-only source segments.

pub mod config;
pub mod filter;
pub mod partition_merger;
pub mod reclaim_map;
pub mod reducer;
pub mod registry;
pub mod segment_merger;
pub mod strategy;

pub use config::{
    MergeConfig, MergeStrategyConfig, ParallelMergeConfig, RangeFilterConfig,
    VersionTimestampPolicy,
};
pub use filter::{AttributeLookup, AttributeRangeFilter, MergeDocFilter};
pub use partition_merger::{MergeStats, MergerState, MultiPartitionMerger};
pub use reclaim_map::{ReclaimMap, ReclaimMapBuilder, SegmentDocIdMap};
pub use reducer::{
    DynIndexReducer, IndexReduceItem, IndexReducer, OutputSegment, ReduceDriver, ReduceResource,
    ReduceState, ReduceTask,
};
pub use registry::{CustomizedIndexFactory, CustomizedIndexer, ReducerRegistry};
pub use segment_merger::{ParallelMergeItem, PreparedPlan, ReduceTarget, SegmentMerger};
pub use strategy::{MergePlan, MergePlanKind, MergeStrategy, MergeTask};
