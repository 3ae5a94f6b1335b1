//! Command implementations for the indexlib CLI.

use std::path::Path;
use std::sync::Arc;

use crate::cli::args::{Command, IndexlibArgs, InspectArgs, MergeArgs};
use crate::cli::output::{InspectReport, MergeReport, SegmentReport, output_result};
use crate::error::{IndexlibError, Result};
use crate::index::counter::CounterRegistry;
use crate::index::partition::PartitionReader;
use crate::merge::{MergeConfig, MultiPartitionMerger, ReducerRegistry};
use crate::storage::file::FileStorageConfig;
use crate::storage::{Storage, StorageConfig, StorageFactory};

/// Execute a CLI command.
pub fn execute_command(args: IndexlibArgs) -> Result<()> {
    match &args.command {
        Command::Merge(merge_args) => merge_partitions(merge_args, &args),
        Command::Inspect(inspect_args) => inspect_partition(inspect_args, &args),
    }
}

fn open_storage(path: &Path, use_mmap: bool) -> Result<Arc<dyn Storage>> {
    let mut config = FileStorageConfig::new(path);
    config.use_mmap = use_mmap;
    StorageFactory::create(StorageConfig::File(config))
}

/// Configuration file plus command line overrides.
pub fn load_merge_config(args: &MergeArgs) -> Result<MergeConfig> {
    let mut config = match &args.config {
        Some(path) => MergeConfig::from_file(path)?,
        None => MergeConfig::default(),
    };
    if let Some(instances) = args.parallel {
        config.parallel.instance_count = instances;
    }
    if let Some(threads) = args.threads {
        config.parallel.thread_count = threads;
    }
    config.validate()?;
    Ok(config)
}

fn merge_partitions(args: &MergeArgs, cli_args: &IndexlibArgs) -> Result<()> {
    for source in &args.sources {
        if !source.is_dir() {
            return Err(IndexlibError::invalid_argument(format!(
                "source partition {} is not a directory",
                source.display()
            )));
        }
    }
    let config = load_merge_config(args)?;
    let sources = args
        .sources
        .iter()
        .map(|path| open_storage(path, args.mmap))
        .collect::<Result<Vec<_>>>()?;
    let dest = open_storage(&args.dest, false)?;

    log::info!(
        "merging {} partitions into {} as version {}",
        sources.len(),
        args.dest.display(),
        args.version_id
    );
    let counters = Arc::new(CounterRegistry::new());
    let mut merger = MultiPartitionMerger::new(
        sources,
        dest,
        config,
        ReducerRegistry::new(),
        Arc::clone(&counters),
    );
    merger.init()?;
    let version = merger.merge(args.version_id)?;

    output_result(
        "Merge committed",
        &MergeReport {
            dest: args.dest.to_string_lossy().to_string(),
            version_id: version.version_id,
            segment_ids: version.segment_ids.clone(),
            stats: merger.stats().clone(),
            counters: counters.snapshot(),
        },
        cli_args,
    )
}

fn inspect_partition(args: &InspectArgs, cli_args: &IndexlibArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(IndexlibError::invalid_argument(format!(
            "partition {} is not a directory",
            args.dir.display()
        )));
    }
    let storage = open_storage(&args.dir, true)?;
    let counters = Arc::new(CounterRegistry::new());
    let reader = match args.version {
        Some(version_id) => PartitionReader::open_version(storage, version_id, counters)?,
        None => PartitionReader::open(storage, counters)?,
    };

    let schema = reader.schema();
    let version = reader.version();
    let segments = reader
        .segments()
        .iter()
        .map(|segment| SegmentReport {
            segment_id: segment.segment_id(),
            base_doc_id: segment.base_doc_id(),
            doc_count: segment.doc_count(),
            deleted_count: segment.deletion_map().deleted_count(),
            merged: segment.info().merged,
            timestamp: segment.info().timestamp,
        })
        .collect();

    output_result(
        "Partition",
        &InspectReport {
            path: args.dir.to_string_lossy().to_string(),
            schema: schema.name.clone(),
            version_id: version.version_id,
            timestamp: version.timestamp,
            locator: version.locator.clone(),
            shard_count: version.shard_count,
            total_docs: reader.total_doc_count(),
            live_docs: reader.live_doc_count(),
            indexes: schema.indexes.iter().map(|i| i.name().to_string()).collect(),
            pack_attributes: schema.pack_attributes.iter().map(|p| p.name.clone()).collect(),
            segments,
        },
        cli_args,
    )
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::merge::MergeStrategyConfig;

    #[test]
    fn test_load_merge_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge.json");
        std::fs::write(
            &path,
            r#"{"strategy": {"type": "balance", "max_segment_count": 2}, "parallel": {"instance_count": 1, "thread_count": 2}}"#,
        )
        .unwrap();

        let args = IndexlibArgs::try_parse_from([
            "indexlib",
            "merge",
            "--source",
            "a",
            "--dest",
            "b",
            "--version-id",
            "1",
            "--config",
            path.to_str().unwrap(),
            "--parallel",
            "3",
        ])
        .unwrap();
        let Command::Merge(merge_args) = args.command else {
            panic!("expected merge command");
        };
        let config = load_merge_config(&merge_args).unwrap();

        assert_eq!(config.strategy, MergeStrategyConfig::Balance { max_segment_count: 2 });
        assert_eq!(config.parallel.instance_count, 3);
        assert_eq!(config.parallel.thread_count, 2);
    }

    #[test]
    fn test_merge_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let args = IndexlibArgs::try_parse_from([
            "indexlib",
            "merge",
            "--source",
            dir.path().join("missing").to_str().unwrap(),
            "--dest",
            dir.path().join("out").to_str().unwrap(),
            "--version-id",
            "0",
        ])
        .unwrap();
        let err = execute_command(args).unwrap_err();
        assert!(matches!(err, IndexlibError::InvalidArgument(_)));
    }
}
