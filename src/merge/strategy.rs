//! Grouping source segments into merge plans.

use crate::error::Result;
use crate::index::segment::SegmentData;
use crate::merge::config::MergeStrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePlanKind {
    /// Rewrite the sources through the reclaim map.
    Merge,
    /// Carry the single source over unchanged.
    Copy,
}

/// One group of source segments producing one or more target segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub kind: MergePlanKind,
    /// Indices into the source segment list, ascending.
    pub sources: Vec<usize>,
    /// Output split for [`MergePlanKind::Merge`] plans.
    pub max_doc_count_per_segment: Option<u32>,
}

impl MergePlan {
    fn copy(source: usize) -> Self {
        MergePlan {
            kind: MergePlanKind::Copy,
            sources: vec![source],
            max_doc_count_per_segment: None,
        }
    }
}

/// All plans of one merge, ordered by their first source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTask {
    pub plans: Vec<MergePlan>,
}

impl MergeTask {
    pub fn merge_plan_count(&self) -> usize {
        self.plans
            .iter()
            .filter(|p| p.kind == MergePlanKind::Merge)
            .count()
    }
}

/// Decides which segments are merged together.
pub trait MergeStrategy: Send + Sync {
    fn create_task(&self, segments: &[SegmentData]) -> Result<MergeTask>;
}

/// Everything into one plan.
#[derive(Debug, Clone)]
pub struct OptimizeStrategy {
    pub max_doc_count_per_segment: Option<u32>,
    pub skip_single_merged_segment: bool,
}

impl MergeStrategy for OptimizeStrategy {
    fn create_task(&self, segments: &[SegmentData]) -> Result<MergeTask> {
        if segments.is_empty() {
            return Ok(MergeTask::default());
        }
        if self.skip_single_merged_segment && segments.len() == 1 {
            let segment = &segments[0];
            if segment.info().merged && segment.deletion_map().deleted_count() == 0 {
                log::info!(
                    "segment {} is already optimized, copying it",
                    segment.segment_id()
                );
                return Ok(MergeTask {
                    plans: vec![MergePlan::copy(0)],
                });
            }
        }
        Ok(MergeTask {
            plans: vec![MergePlan {
                kind: MergePlanKind::Merge,
                sources: (0..segments.len()).collect(),
                max_doc_count_per_segment: self.max_doc_count_per_segment,
            }],
        })
    }
}

/// Merge the smallest segments (by live docs) until the count bound holds.
#[derive(Debug, Clone)]
pub struct BalanceStrategy {
    pub max_segment_count: usize,
}

impl MergeStrategy for BalanceStrategy {
    fn create_task(&self, segments: &[SegmentData]) -> Result<MergeTask> {
        let max = self.max_segment_count.max(1);
        if segments.len() <= max {
            return Ok(MergeTask {
                plans: (0..segments.len()).map(MergePlan::copy).collect(),
            });
        }

        let mut by_size: Vec<usize> = (0..segments.len()).collect();
        by_size.sort_by_key(|&i| (segments[i].deletion_map().live_count(), i));
        let merge_count = segments.len() - max + 1;
        let mut merged: Vec<usize> = by_size[..merge_count].to_vec();
        merged.sort_unstable();

        let mut plans: Vec<MergePlan> = by_size[merge_count..]
            .iter()
            .map(|&i| MergePlan::copy(i))
            .collect();
        plans.push(MergePlan {
            kind: MergePlanKind::Merge,
            sources: merged,
            max_doc_count_per_segment: None,
        });
        plans.sort_by_key(|p| p.sources[0]);
        Ok(MergeTask { plans })
    }
}

pub fn create_strategy(config: &MergeStrategyConfig) -> Box<dyn MergeStrategy> {
    match config {
        MergeStrategyConfig::Optimize {
            max_doc_count_per_segment,
            skip_single_merged_segment,
        } => Box::new(OptimizeStrategy {
            max_doc_count_per_segment: *max_doc_count_per_segment,
            skip_single_merged_segment: *skip_single_merged_segment,
        }),
        MergeStrategyConfig::Balance { max_segment_count } => Box::new(BalanceStrategy {
            max_segment_count: *max_segment_count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::deletion::DeletionMap;
    use crate::index::segment::{SegmentInfo, segment_dir_name};
    use crate::storage::memory::MemoryStorage;
    use crate::storage::{Storage, sub_storage};

    fn segments(counts: &[(u32, bool)]) -> Vec<SegmentData> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut base = 0;
        counts
            .iter()
            .enumerate()
            .map(|(id, &(doc_count, merged))| {
                let dir = sub_storage(&storage, &segment_dir_name(id as u32));
                SegmentInfo {
                    segment_id: id as u32,
                    doc_count,
                    timestamp: 0,
                    locator: String::new(),
                    merged,
                }
                .store(dir.as_ref())
                .unwrap();
                DeletionMap::new(doc_count).store(dir.as_ref()).unwrap();
                let segment = SegmentData::open(&storage, id as u32, base).unwrap();
                base += doc_count;
                segment
            })
            .collect()
    }

    #[test]
    fn test_optimize() {
        let strategy = OptimizeStrategy {
            max_doc_count_per_segment: Some(10),
            skip_single_merged_segment: true,
        };
        let task = strategy.create_task(&segments(&[(3, false), (4, true)])).unwrap();
        assert_eq!(task.plans.len(), 1);
        assert_eq!(task.plans[0].sources, vec![0, 1]);
        assert_eq!(task.plans[0].max_doc_count_per_segment, Some(10));

        let task = strategy.create_task(&segments(&[(4, true)])).unwrap();
        assert_eq!(task.plans[0].kind, MergePlanKind::Copy);

        let task = strategy.create_task(&segments(&[(4, false)])).unwrap();
        assert_eq!(task.plans[0].kind, MergePlanKind::Merge);
        assert!(strategy.create_task(&[]).unwrap().plans.is_empty());
    }

    #[test]
    fn test_balance() {
        let strategy = BalanceStrategy {
            max_segment_count: 2,
        };
        let task = strategy
            .create_task(&segments(&[(50, false), (1, false), (30, false), (2, false)]))
            .unwrap();
        assert_eq!(task.merge_plan_count(), 1);
        let kinds: Vec<(MergePlanKind, Vec<usize>)> = task
            .plans
            .iter()
            .map(|p| (p.kind, p.sources.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MergePlanKind::Copy, vec![0]),
                (MergePlanKind::Merge, vec![1, 2, 3]),
            ]
        );

        let task = strategy.create_task(&segments(&[(5, false), (6, false)])).unwrap();
        assert_eq!(task.merge_plan_count(), 0);
        assert_eq!(task.plans.len(), 2);
    }
}
