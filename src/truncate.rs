//! Posting truncation: keep the best documents of a long posting list.
//!
//! A [`TruncateProfile`] names the sort keys and the size limit; its
//! [`DiversityConstrain`] optionally filters documents by an attribute range
//! or timestamp window and keeps extending the selection until enough
//! distinct values of a field are represented.

pub mod constrain;
pub mod distinctor;
pub mod doc_filter;
pub mod profile;

pub use constrain::{DiversityConstrain, FilterConstrain};
pub use distinctor::DocDistinctor;
pub use doc_filter::{DocFilter, DocValueLookup, RangeDocFilter, TimestampDocFilter, create_doc_filter};
pub use profile::{SortParam, TruncateProfile, truncate_posting};
