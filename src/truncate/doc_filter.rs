use crate::error::Result;
use crate::index::DocId;
use crate::index::attribute::{AttributeValue, PackAttributeReader};
use crate::index::partition::PartitionReader;

use super::constrain::FilterConstrain;

/// Source of per-document attribute values consulted while truncating.
pub trait DocValueLookup {
    /// Value of `field` for `doc_id`; `Ok(None)` when the document has none.
    fn value(&self, doc_id: DocId, field: &str) -> Result<Option<AttributeValue>>;

    fn integer(&self, doc_id: DocId, field: &str) -> Result<Option<i64>> {
        Ok(self.value(doc_id, field)?.and_then(|value| value.as_i64()))
    }
}

/// Segment-local doc ids.
impl DocValueLookup for PackAttributeReader {
    fn value(&self, doc_id: DocId, field: &str) -> Result<Option<AttributeValue>> {
        Ok(self.read_value(doc_id, field)?.filter(|value| !value.is_null()))
    }
}

/// Partition-global doc ids; deleted documents have no value.
impl DocValueLookup for PartitionReader {
    fn value(&self, doc_id: DocId, field: &str) -> Result<Option<AttributeValue>> {
        Ok(self
            .read_attribute_value(doc_id, field)?
            .filter(|value| !value.is_null()))
    }
}

/// Decides whether a document is dropped before truncate selection.
pub trait DocFilter: Send + Sync {
    /// `true` when `doc_id` must not be selected.
    fn is_filtered(&self, doc_id: DocId, lookup: &dyn DocValueLookup) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct RangeDocFilter {
    field: String,
    min: i64,
    max: i64,
    mask: u64,
}

impl RangeDocFilter {
    pub fn new(field: impl Into<String>, min: i64, max: i64, mask: u64) -> Self {
        RangeDocFilter {
            field: field.into(),
            min,
            max,
            mask,
        }
    }
}

impl DocFilter for RangeDocFilter {
    fn is_filtered(&self, doc_id: DocId, lookup: &dyn DocValueLookup) -> Result<bool> {
        let Some(value) = lookup.integer(doc_id, &self.field)? else {
            return Ok(true);
        };
        let masked = (value as u64 & self.mask) as i64;
        Ok(masked < self.min || masked > self.max)
    }
}

#[derive(Debug, Clone)]
pub struct TimestampDocFilter {
    field: String,
    begin: i64,
    end: i64,
}

impl TimestampDocFilter {
    pub fn new(field: impl Into<String>, begin: i64, end: i64) -> Self {
        TimestampDocFilter {
            field: field.into(),
            begin,
            end,
        }
    }
}

impl DocFilter for TimestampDocFilter {
    fn is_filtered(&self, doc_id: DocId, lookup: &dyn DocValueLookup) -> Result<bool> {
        Ok(match lookup.integer(doc_id, &self.field)? {
            Some(ts) => ts < self.begin || ts > self.end,
            None => true,
        })
    }
}

pub fn create_doc_filter(constrain: &FilterConstrain) -> Box<dyn DocFilter> {
    match constrain {
        FilterConstrain::Range {
            field,
            min,
            max,
            mask,
        } => Box::new(RangeDocFilter::new(field.clone(), *min, *max, *mask)),
        FilterConstrain::Timestamp { field, begin, end } => {
            Box::new(TimestampDocFilter::new(field.clone(), *begin, *end))
        }
    }
}
