mod common;

use std::sync::Arc;

use common::{Row, build_partition, file_storage, open_reader, prices, product_schema, snapshot_files};
use indexlib::error::{ErrorAdvice, IndexlibError};
use indexlib::index::version::SortOrder;
use indexlib::index::{CounterRegistry, FieldConfig, FieldType, PartitionMeta};
use indexlib::merge::{
    MergeConfig, MergeStrategyConfig, MergerState, MultiPartitionMerger, RangeFilterConfig,
    ReducerRegistry, SegmentMerger,
};
use indexlib::storage::Storage;
use indexlib::storage::memory::{MemoryStorage, MemoryStorageConfig};
use tempfile::TempDir;

const P0: [Row; 5] = [
    ("a", 0, "s0"),
    ("b", 10, "s1"),
    ("a", 20, "s0"),
    ("b", 30, "s1"),
    ("a", 40, "s0"),
];
const P1: [Row; 3] = [("c", 100, "s2"), ("a", 101, "s3"), ("c", 102, "s2")];

/// Two partitions: P0 in segments of 3 with doc 1 deleted, P1 in one segment.
fn sources(dir: &TempDir, meta: PartitionMeta) -> Vec<Arc<dyn Storage>> {
    vec![
        build_partition(
            file_storage(&dir.path().join("p0")),
            product_schema(),
            meta.clone(),
            &P0,
            3,
            &[1],
            10,
        ),
        build_partition(
            file_storage(&dir.path().join("p1")),
            product_schema(),
            meta,
            &P1,
            3,
            &[],
            20,
        ),
    ]
}

fn merger(
    sources: Vec<Arc<dyn Storage>>,
    dest: Arc<dyn Storage>,
    config: MergeConfig,
) -> MultiPartitionMerger {
    MultiPartitionMerger::new(
        sources,
        dest,
        config,
        ReducerRegistry::new(),
        Arc::new(CounterRegistry::new()),
    )
}

#[test]
fn test_merge_drops_deleted_documents() {
    let dir = TempDir::new().unwrap();
    let dest = file_storage(&dir.path().join("dest"));
    let mut merger = merger(sources(&dir, PartitionMeta::default()), Arc::clone(&dest), MergeConfig::default());

    merger.init().unwrap();
    assert_eq!(merger.state(), MergerState::MergerCreated);
    let version = merger.merge(0).unwrap();
    assert_eq!(merger.state(), MergerState::MergeCommitted);

    assert_eq!(version.segment_ids, vec![0]);
    // newest source version wins
    assert_eq!(version.timestamp, 20);
    assert_eq!(version.locator, "locator-20");

    let stats = merger.stats();
    assert_eq!(stats.source_segments, 3);
    assert_eq!(stats.merged_plans, 1);
    assert_eq!(stats.source_docs, 8);
    assert_eq!(stats.target_docs, 7);

    let reader = open_reader(&dest);
    assert_eq!(reader.total_doc_count(), 7);
    assert_eq!(reader.live_doc_count(), 7);
    assert_eq!(reader.bitmap_lookup("tag", "a").unwrap(), Some(vec![0, 1, 3, 5]));
    assert_eq!(reader.bitmap_lookup("tag", "b").unwrap(), Some(vec![2]));
    assert_eq!(reader.bitmap_lookup("tag", "c").unwrap(), Some(vec![4, 6]));
    assert_eq!(prices(&reader), vec![0, 20, 30, 40, 100, 101, 102]);
    assert_eq!(reader.read_attribute(5, "shop").unwrap().as_deref(), Some("s3"));

    let counters = merger.counters();
    assert_eq!(counters.value("merge.docs"), Some(7));
    assert_eq!(counters.value("merge.pack.docs"), Some(7));
    assert_eq!(counters.value("merge.tag.terms"), Some(3));
}

#[test]
fn test_schema_mismatch_leaves_destination_untouched() {
    let dir = TempDir::new().unwrap();
    let p0 = build_partition(
        file_storage(&dir.path().join("p0")),
        product_schema(),
        PartitionMeta::default(),
        &P0,
        5,
        &[],
        1,
    );
    let p1 = build_partition(
        file_storage(&dir.path().join("p1")),
        product_schema().with_field(FieldConfig::new("color", FieldType::String)),
        PartitionMeta::default(),
        &P1,
        5,
        &[],
        2,
    );
    let dest = file_storage(&dir.path().join("dest"));

    let mut merger = merger(vec![p0, p1], Arc::clone(&dest), MergeConfig::default());
    let err = merger.init().unwrap_err();
    assert!(matches!(err, IndexlibError::Schema(_)));
    assert!(dest.list_files().unwrap().is_empty());

    let info = merger.run(0).unwrap_err();
    assert_eq!(info.advice, ErrorAdvice::Stop);
    assert!(dest.list_files().unwrap().is_empty());
}

#[test]
fn test_sort_merge_orders_by_price() {
    let dir = TempDir::new().unwrap();
    let meta = PartitionMeta::sorted_by("price", SortOrder::Descending);
    let dest = file_storage(&dir.path().join("dest"));
    let mut merger = merger(sources(&dir, meta), Arc::clone(&dest), MergeConfig::default());
    merger.run(0).unwrap();

    let reader = open_reader(&dest);
    assert_eq!(prices(&reader), vec![102, 101, 100, 40, 30, 20, 0]);
    assert_eq!(reader.bitmap_lookup("tag", "a").unwrap(), Some(vec![1, 3, 5, 6]));
    assert_eq!(reader.bitmap_lookup("tag", "c").unwrap(), Some(vec![0, 2]));
}

#[test]
fn test_parallel_merge_matches_single_merge() {
    let dir = TempDir::new().unwrap();
    let single = file_storage(&dir.path().join("single"));
    let parallel = file_storage(&dir.path().join("parallel"));

    merger(sources(&dir, PartitionMeta::default()), Arc::clone(&single), MergeConfig::default())
        .run(0)
        .unwrap();

    let mut config = MergeConfig::default();
    config.parallel.instance_count = 3;
    config.parallel.thread_count = 2;
    merger(
        vec![
            file_storage(&dir.path().join("p0")),
            file_storage(&dir.path().join("p1")),
        ],
        Arc::clone(&parallel),
        config,
    )
    .run(0)
    .unwrap();

    assert_eq!(snapshot_files(&single), snapshot_files(&parallel));
    assert!(
        parallel
            .list_files()
            .unwrap()
            .iter()
            .all(|name| !name.contains("instance_"))
    );
}

#[test]
fn test_end_parallel_reduce_twice_is_noop() {
    let dir = TempDir::new().unwrap();
    let source = build_partition(
        file_storage(&dir.path().join("p0")),
        product_schema(),
        PartitionMeta::default(),
        &P0,
        2,
        &[3],
        5,
    );
    let reader = open_reader(&source);
    let schema = reader.schema().clone();
    let meta = reader.descriptor().meta.clone();
    let registry = ReducerRegistry::new();
    let counters = CounterRegistry::new();
    let merger = SegmentMerger::new(&schema, &meta, &registry, &counters);
    let segments = reader.segments();

    let plain: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    merger.merge_plan(segments, &plain, 0, None).unwrap();

    let parallel: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let plan = merger.prepare_plan(segments, &parallel, 0, None).unwrap();
    let items = merger.create_parallel_merge_items(segments, 2).unwrap();
    assert!(items.len() >= 2);
    merger.execute_parallel_merge_items(segments, &plan, &items).unwrap();
    merger.end_parallel_reduce(&plan, &items).unwrap();
    let joined = snapshot_files(&parallel);
    merger.end_parallel_reduce(&plan, &items).unwrap();
    assert_eq!(snapshot_files(&parallel), joined);
    merger.finish_plan(segments, &plan).unwrap();

    assert_eq!(snapshot_files(&plain), snapshot_files(&parallel));
}

#[test]
fn test_filtered_merge_forces_optimize() {
    let dir = TempDir::new().unwrap();
    let dest = file_storage(&dir.path().join("dest"));
    let config = MergeConfig {
        strategy: MergeStrategyConfig::Balance {
            max_segment_count: 5,
        },
        filter: Some(RangeFilterConfig {
            field: "price".to_string(),
            min: Some(20.0),
            max: Some(100.0),
        }),
        ..Default::default()
    };
    let mut merger = merger(sources(&dir, PartitionMeta::default()), Arc::clone(&dest), config);
    merger.init().unwrap();
    assert_eq!(
        merger.config().strategy,
        MergeStrategyConfig::Optimize {
            max_doc_count_per_segment: None,
            skip_single_merged_segment: false,
        }
    );
    merger.merge(0).unwrap();

    let reader = open_reader(&dest);
    assert_eq!(prices(&reader), vec![20, 30, 40, 100]);
    assert_eq!(reader.bitmap_lookup("tag", "a").unwrap(), Some(vec![0, 2]));
    assert_eq!(reader.bitmap_lookup("tag", "c").unwrap(), Some(vec![3]));
}

#[test]
fn test_single_merged_segment_is_copied() {
    let dir = TempDir::new().unwrap();
    let first = file_storage(&dir.path().join("first"));
    merger(sources(&dir, PartitionMeta::default()), Arc::clone(&first), MergeConfig::default())
        .run(0)
        .unwrap();

    let second = file_storage(&dir.path().join("second"));
    let mut merger = merger(vec![Arc::clone(&first)], Arc::clone(&second), MergeConfig::default());
    merger.run(0).unwrap();
    assert_eq!(merger.stats().copied_plans, 1);
    assert_eq!(merger.stats().merged_plans, 0);

    assert_eq!(prices(&open_reader(&second)), prices(&open_reader(&first)));
}

#[test]
fn test_split_into_bounded_segments() {
    let dir = TempDir::new().unwrap();
    let dest = file_storage(&dir.path().join("dest"));
    let config = MergeConfig {
        strategy: MergeStrategyConfig::Optimize {
            max_doc_count_per_segment: Some(3),
            skip_single_merged_segment: true,
        },
        ..Default::default()
    };
    let version = merger(sources(&dir, PartitionMeta::default()), Arc::clone(&dest), config)
        .run(0)
        .unwrap();
    assert_eq!(version.segment_ids, vec![0, 1, 2]);

    let reader = open_reader(&dest);
    let counts: Vec<u32> = reader.segments().iter().map(|s| s.doc_count()).collect();
    assert_eq!(counts, vec![3, 3, 1]);
    assert_eq!(prices(&reader), vec![0, 20, 30, 40, 100, 101, 102]);
    assert_eq!(reader.bitmap_lookup("tag", "a").unwrap(), Some(vec![0, 1, 3, 5]));
}

#[test]
fn test_existing_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let dest = file_storage(&dir.path().join("dest"));
    merger(sources(&dir, PartitionMeta::default()), Arc::clone(&dest), MergeConfig::default())
        .run(0)
        .unwrap();

    let sources = vec![
        file_storage(&dir.path().join("p0")),
        file_storage(&dir.path().join("p1")),
    ];
    let mut again = merger(sources, Arc::clone(&dest), MergeConfig::default());
    again.init().unwrap();
    let err = again.merge(0).unwrap_err();
    assert!(matches!(err, IndexlibError::InvalidArgument(_)));
}

#[test]
fn test_everything_deleted_yields_empty_version() {
    let dir = TempDir::new().unwrap();
    let source = build_partition(
        file_storage(&dir.path().join("p0")),
        product_schema(),
        PartitionMeta::default(),
        &P1,
        3,
        &[0, 1, 2],
        3,
    );
    let dest = file_storage(&dir.path().join("dest"));
    let version = merger(vec![source], Arc::clone(&dest), MergeConfig::default())
        .run(4)
        .unwrap();
    assert!(version.segment_ids.is_empty());
    assert_eq!(open_reader(&dest).total_doc_count(), 0);
}
