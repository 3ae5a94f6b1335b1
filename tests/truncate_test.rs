mod common;

use std::collections::HashSet;

use common::{Row, build_partition, file_storage, open_reader, product_schema};
use indexlib::index::{DocId, PartitionMeta, PartitionReader};
use indexlib::truncate::{DocValueLookup, TruncateProfile, truncate_posting};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const ROWS: [Row; 12] = [
    ("a", 50, "s0"),
    ("a", 80, "s0"),
    ("b", 99, "s1"),
    ("a", 70, "s0"),
    ("a", 20, "s1"),
    ("a", 90, "s0"),
    ("a", 65, "s2"),
    ("b", 10, "s2"),
    ("a", 30, "s3"),
    ("a", 85, "s0"),
    ("a", 15, "s3"),
    ("a", 60, "s1"),
];

fn reader(dir: &TempDir) -> PartitionReader {
    let storage = build_partition(
        file_storage(&dir.path().join("p0")),
        product_schema(),
        PartitionMeta::default(),
        &ROWS,
        5,
        &[3],
        1,
    );
    open_reader(&storage)
}

fn price(reader: &PartitionReader, doc: DocId) -> i64 {
    reader.integer(doc, "price").unwrap().unwrap()
}

fn shop(reader: &PartitionReader, doc: DocId) -> String {
    reader.value(doc, "shop").unwrap().unwrap().to_string()
}

#[test]
fn test_truncate_partition_posting() {
    let dir = TempDir::new().unwrap();
    let reader = reader(&dir);
    let posting = reader.bitmap_lookup("tag", "a").unwrap().unwrap();
    // doc 3 is deleted
    assert!(!posting.contains(&3));

    let profile = TruncateProfile::new("top3", 3).with_sort("-price").unwrap();
    let kept = truncate_posting(&profile, posting.iter().copied(), &reader).unwrap();
    // 90, 85, 80
    assert_eq!(kept, vec![1, 5, 9]);

    let diverse = TruncateProfile::new("diverse", 3)
        .with_sort("-price")
        .unwrap()
        .with_diversity("distinct_field=shop;distinct_count=3;distinct_expand_limit=6");
    let kept = truncate_posting(&diverse, posting.iter().copied(), &reader).unwrap();
    // 90 s0, 85 s0, 80 s0, 65 s2, 60 s1
    assert_eq!(kept, vec![1, 5, 6, 9, 11]);
}

#[test]
fn test_truncate_with_timestamp_filter() {
    let dir = TempDir::new().unwrap();
    let reader = reader(&dir);
    let posting = reader.bitmap_lookup("tag", "a").unwrap().unwrap();

    // price doubles as a timestamp here
    let profile = TruncateProfile::new("window", 10)
        .with_sort("+price")
        .unwrap()
        .with_diversity("filter_field=price;filter_type=FilterByTimeStamp;begin_time=20;end_time=60");
    let kept = truncate_posting(&profile, posting.iter().copied(), &reader).unwrap();
    assert_eq!(kept, vec![0, 4, 8, 11]);
}

#[test]
fn test_selection_honours_constraints() {
    let dir = TempDir::new().unwrap();
    let reader = reader(&dir);
    let posting = reader.bitmap_lookup("tag", "a").unwrap().unwrap();
    let mut rng = StdRng::seed_from_u64(14);

    for _ in 0..200 {
        let limit = rng.random_range(1..8usize);
        let min = rng.random_range(0..60i64);
        let max = rng.random_range(min..100);
        let distinct = rng.random_range(1..5u64);
        let expand = rng.random_range(distinct..10);
        let profile = TruncateProfile::new("random", limit)
            .with_sort("-price")
            .unwrap()
            .with_diversity(format!(
                "filter_field=price;filter_min={min};filter_max={max};\
                 distinct_field=shop;distinct_count={distinct};distinct_expand_limit={expand}"
            ));
        let kept = truncate_posting(&profile, posting.iter().copied(), &reader).unwrap();

        let mut ranked: Vec<DocId> = posting
            .iter()
            .copied()
            .filter(|&doc| (min..=max).contains(&price(&reader, doc)))
            .collect();
        ranked.sort_by_key(|&doc| (-price(&reader, doc), doc));

        assert!(kept.len() >= limit.min(ranked.len()));
        assert!(kept.len() <= limit.max(expand as usize));
        // the selection is the head of the ranking
        let head: HashSet<DocId> = ranked[..kept.len()].iter().copied().collect();
        assert_eq!(kept.iter().copied().collect::<HashSet<_>>(), head);
        // expansion past the limit only while shops were missing
        if kept.len() > limit {
            let shops: HashSet<String> = ranked[..kept.len() - 1]
                .iter()
                .map(|&doc| shop(&reader, doc))
                .collect();
            assert!((shops.len() as u64) < distinct);
        }
    }
}
