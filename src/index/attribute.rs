//! Pack attributes: several attribute fields stored as one record per
//! document.
//!
//! A record is laid out as
//!
//! ```text
//! [null bitmap][fixed-width values][u32 offset per var-len value][var-len data]
//! ```
//!
//! Offsets are relative to the start of the record. Var-len values are
//! strings, multi-values and the opaque text/location types; each starts
//! with a varint length or count. A document with an empty record has no
//! data.

pub mod formatter;
pub mod iterator;
pub mod reader;
pub mod reducer;
pub mod value;
pub mod writer;

pub use formatter::{AttributeReference, PackAttributeFormatter};
pub use iterator::{AttributeIterator, StringAttributeIterator};
pub use reader::PackAttributeReader;
pub use reducer::PackAttributeReducer;
pub use value::{AttributeValue, NumericValue, NumericVisitor, with_numeric_type};
pub use writer::PackAttributeWriter;

/// Record data file of a pack attribute directory.
pub const DATA_FILE: &str = "data";
/// Record offset file of a pack attribute directory.
pub const OFFSET_FILE: &str = "offset";
