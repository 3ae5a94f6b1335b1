//! # indexlib
//!
//! Segment-based index storage: documents are built into immutable segments
//! holding bitmap postings, pack attributes and customized indexes, and
//! segments of one or more partitions are merged into new versions.
//!
//! ## Modules
//!
//! - [`index`]: schema, bitmap postings, pack attributes, segments and the
//!   partition writer/reader
//! - [`merge`]: reclaim maps, merge strategies, the reduce framework and the
//!   multi-partition merger
//! - [`truncate`]: filter and distinct constraints for truncated postings
//! - [`storage`]: file and in-memory storage backends
//! - [`cli`]: the `indexlib` command line
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use indexlib::index::{
//!     CounterRegistry, Document, FieldConfig, FieldType, IndexConfig, PartitionMeta,
//!     PartitionReader, PartitionWriter, Schema,
//! };
//! use indexlib::merge::ReducerRegistry;
//! use indexlib::storage::Storage;
//! use indexlib::storage::memory::{MemoryStorage, MemoryStorageConfig};
//!
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
//! let schema = Schema::new("books")
//!     .with_field(FieldConfig::new("tag", FieldType::String))
//!     .with_index(IndexConfig::Bitmap { name: "tag".into(), field: "tag".into() });
//!
//! let mut writer = PartitionWriter::create(
//!     Arc::clone(&storage),
//!     schema,
//!     PartitionMeta::default(),
//!     ReducerRegistry::new(),
//! )?;
//! writer.add_document(&Document::new().with_field("tag", "rust"))?;
//! writer.add_document(&Document::new().with_field("tag", "go"))?;
//! writer.add_document(&Document::new().with_field("tag", "rust"))?;
//! writer.commit(0, "")?;
//!
//! let reader = PartitionReader::open(storage, Arc::new(CounterRegistry::new()))?;
//! assert_eq!(reader.bitmap_lookup("tag", "rust")?, Some(vec![0, 2]));
//! # Ok::<(), indexlib::error::IndexlibError>(())
//! ```

pub mod cli;
pub mod error;
pub mod index;
pub mod merge;
pub mod storage;
pub mod truncate;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
