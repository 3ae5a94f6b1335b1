//! Bitmap postings: one presence bit per document for each term.
//!
//! Bitmap postings suit high-frequency terms, where a bit per docid is
//! smaller than a compressed docid list and membership tests are O(1).
//!
//! A dumped posting is laid out as
//!
//! ```text
//! [term meta: varint df, varint ttf (= 0), u16 payload][u32 bitmap byte length][bitmap slots]
//! ```
//!
//! all little-endian, with the bitmap covering `last_doc_id + 1` bits rounded
//! up to whole 32-bit slots.

pub mod decoder;
pub mod index_reader;
pub mod index_writer;
pub mod merger;
pub mod posting_writer;
pub mod reducer;

pub use decoder::{BitmapPosting, InMemBitmapDecoder};
pub use index_reader::BitmapIndexReader;
pub use index_writer::{BitmapIndexFileWriter, BitmapIndexWriter};
pub use merger::{BitmapPostingMerger, SegmentTermInfo};
pub use posting_writer::{BitmapPostingWriter, InMemPostingState};
pub use reducer::BitmapIndexReducer;

/// Dictionary file of a bitmap index directory.
pub const DICTIONARY_FILE: &str = "dictionary";
/// Posting file of a bitmap index directory.
pub const POSTING_FILE: &str = "posting";
