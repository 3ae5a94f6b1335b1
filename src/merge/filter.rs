//! Per-document attribute access during a merge: document filters and sort
//! weights.

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::attribute::{AttributeValue, PackAttributeReader};
use crate::index::counter::CounterRegistry;
use crate::index::schema::Schema;
use crate::index::segment::SegmentData;
use crate::merge::config::RangeFilterConfig;

/// Reads one packed field of every source segment of a merge.
#[derive(Debug)]
pub struct AttributeLookup {
    field: String,
    readers: Vec<PackAttributeReader>,
}

impl AttributeLookup {
    /// `field` must be a numeric single-value field of a pack attribute.
    pub fn open_numeric(schema: &Schema, field: &str, segments: &[SegmentData]) -> Result<Self> {
        let config = schema
            .field(field)
            .ok_or_else(|| IndexlibError::config(format!("unknown field '{field}'")))?;
        if !config.field_type.is_numeric() || config.multi_value {
            return Err(IndexlibError::config(format!(
                "field '{field}' must be a single-value numeric field, found {}",
                config.field_type
            )));
        }
        let pack = schema.pack_attribute_of(field).ok_or_else(|| {
            IndexlibError::config(format!("field '{field}' is not stored in a pack attribute"))
        })?;
        // Merge-internal reads stay out of the access counters.
        let counters = CounterRegistry::new();
        let readers = segments
            .iter()
            .map(|segment| {
                PackAttributeReader::open(
                    pack,
                    schema,
                    segment.attribute_storage(&pack.name).as_ref(),
                    &counters,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AttributeLookup {
            field: field.to_string(),
            readers,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Value of local doc `local` of source `source`, widened to `f64`.
    /// `None` for null and for docs without a record.
    pub fn numeric(&self, source: usize, local: DocId) -> Result<Option<f64>> {
        let reader = self.readers.get(source).ok_or_else(|| {
            IndexlibError::inconsistent(format!("attribute lookup has no source {source}"))
        })?;
        Ok(reader
            .read_value(local, &self.field)?
            .as_ref()
            .and_then(AttributeValue::as_f64))
    }
}

/// Decides which live documents survive a filtered merge.
pub trait MergeDocFilter: Send + Sync {
    fn keep(&self, source: usize, local: DocId) -> Result<bool>;
}

/// Keeps documents whose attribute lies in an inclusive range. Documents
/// without a value are dropped.
#[derive(Debug)]
pub struct AttributeRangeFilter {
    lookup: AttributeLookup,
    min: f64,
    max: f64,
}

impl AttributeRangeFilter {
    pub fn open(config: &RangeFilterConfig, schema: &Schema, segments: &[SegmentData]) -> Result<Self> {
        Ok(AttributeRangeFilter {
            lookup: AttributeLookup::open_numeric(schema, &config.field, segments)?,
            min: config.min.unwrap_or(f64::NEG_INFINITY),
            max: config.max.unwrap_or(f64::INFINITY),
        })
    }
}

impl MergeDocFilter for AttributeRangeFilter {
    fn keep(&self, source: usize, local: DocId) -> Result<bool> {
        Ok(self
            .lookup
            .numeric(source, local)?
            .is_some_and(|value| value >= self.min && value <= self.max))
    }
}
