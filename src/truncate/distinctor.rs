use ahash::AHashSet;

use crate::error::Result;
use crate::index::DocId;

use super::doc_filter::DocValueLookup;

/// Tracks the distinct values of one field among selected documents.
#[derive(Debug)]
pub struct DocDistinctor {
    field: String,
    distinct_count: u64,
    seen: AHashSet<String>,
}

impl DocDistinctor {
    pub fn new(field: impl Into<String>, distinct_count: u64) -> Self {
        DocDistinctor {
            field: field.into(),
            distinct_count,
            seen: AHashSet::new(),
        }
    }

    /// Record the value of `doc_id`. Documents without a value do not count.
    pub fn add(&mut self, doc_id: DocId, lookup: &dyn DocValueLookup) -> Result<()> {
        if let Some(value) = lookup.value(doc_id, &self.field)? {
            self.seen.insert(value.to_string());
        }
        Ok(())
    }

    pub fn distinct_value_count(&self) -> u64 {
        self.seen.len() as u64
    }

    pub fn is_satisfied(&self) -> bool {
        self.distinct_value_count() >= self.distinct_count
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
