//! Index layer: segment data model, bitmap postings and pack attributes.
//!
//! A partition directory holds a schema, a list of versions and the segments
//! those versions reference. Every segment is immutable once dumped; the only
//! thing that changes afterwards is its deletion map.

pub mod attribute;
pub mod bitmap;
pub mod counter;
pub mod deletion;
pub mod partition;
pub mod schema;
pub mod segment;
pub mod term_meta;
pub mod version;

pub use counter::{AccessCounter, CounterRegistry};
pub use deletion::DeletionMap;
pub use partition::{Document, PartitionDescriptor, PartitionReader, PartitionWriter};
pub use schema::{FieldConfig, FieldType, IndexConfig, PackAttributeConfig, Schema};
pub use segment::{SegmentData, SegmentId, SegmentInfo};
pub use term_meta::TermMeta;
pub use version::{IndexFormatVersion, PartitionMeta, Version};

/// Document identifier. Local ids are dense per segment; global ids add the
/// segment's base id.
pub type DocId = u32;
