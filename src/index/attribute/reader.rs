use std::sync::Arc;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::attribute::formatter::{AttributeReference, PackAttributeFormatter};
use crate::index::attribute::iterator::{AttributeIterator, StringAttributeIterator};
use crate::index::attribute::value::{AttributeValue, NumericValue};
use crate::index::attribute::writer::{OFFSET_MAGIC, OFFSET_VERSION};
use crate::index::attribute::{DATA_FILE, OFFSET_FILE};
use crate::index::counter::{AccessCounter, CounterRegistry};
use crate::index::schema::{FieldType, PackAttributeConfig, Schema};
use crate::storage::structured::StructReader;
use crate::storage::{FileData, Storage};

/// Read access to one segment's pack attribute.
#[derive(Debug)]
pub struct PackAttributeReader {
    formatter: PackAttributeFormatter,
    data: FileData,
    offsets: Vec<u64>,
    counters: Vec<Arc<AccessCounter>>,
}

impl PackAttributeReader {
    /// Open the `data` and `offset` files in `storage`. An access counter
    /// `attribute.<pack>.<sub>` is registered for every sub-attribute.
    pub fn open(
        pack: &PackAttributeConfig,
        schema: &Schema,
        storage: &dyn Storage,
        counters: &CounterRegistry,
    ) -> Result<Self> {
        let formatter = PackAttributeFormatter::new(pack, schema)?;
        let data = storage.read_all(DATA_FILE)?;

        let offset_data = storage.read_all(OFFSET_FILE)?;
        let mut reader = StructReader::new(&offset_data[..]);
        if reader.read_u32()? != OFFSET_MAGIC {
            return Err(IndexlibError::index(format!(
                "invalid offset file for pack attribute '{}'",
                pack.name
            )));
        }
        let version = reader.read_u32()?;
        if version != OFFSET_VERSION {
            return Err(IndexlibError::index(format!(
                "unsupported pack attribute offset version: {version}"
            )));
        }
        let doc_count = reader.read_u32()?;
        let offsets = (0..=doc_count)
            .map(|_| reader.read_u64())
            .collect::<Result<Vec<u64>>>()?;
        reader.verify_checksum()?;

        if offsets.first() != Some(&0)
            || offsets.windows(2).any(|w| w[0] > w[1])
            || offsets.last().copied() != Some(data.len() as u64)
        {
            return Err(IndexlibError::index(format!(
                "offsets of pack attribute '{}' do not cover its {}-byte data file",
                pack.name,
                data.len()
            )));
        }

        let counters = formatter
            .sub_attribute_names()
            .map(|sub| counters.get_or_create(&format!("attribute.{}.{sub}", pack.name)))
            .collect();

        log::debug!(
            "opened pack attribute '{}' with {doc_count} records",
            pack.name
        );
        Ok(PackAttributeReader {
            formatter,
            data,
            offsets,
            counters,
        })
    }

    pub fn formatter(&self) -> &PackAttributeFormatter {
        &self.formatter
    }

    pub fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// The record of `doc_id`; `None` beyond the doc count or for an empty
    /// record.
    pub fn record(&self, doc_id: DocId) -> Option<&[u8]> {
        let index = doc_id as usize;
        let (start, end) = (*self.offsets.get(index)?, *self.offsets.get(index + 1)?);
        if start == end {
            return None;
        }
        Some(&self.data[start as usize..end as usize])
    }

    /// Accessor for sub-attribute `name`; `None` if the pack lacks it.
    pub fn reference(&self, name: &str) -> Option<&AttributeReference> {
        self.formatter.reference(name)
    }

    pub(crate) fn counter(&self, reference: &AttributeReference) -> &AccessCounter {
        &self.counters[reference.id()]
    }

    /// Decode sub-attribute `name` of `doc_id`. `Ok(None)` when the pack has
    /// no such sub-attribute or the doc has no record.
    pub fn read_value(&self, doc_id: DocId, name: &str) -> Result<Option<AttributeValue>> {
        let Some(reference) = self.reference(name) else {
            return Ok(None);
        };
        let Some(record) = self.record(doc_id) else {
            return Ok(None);
        };
        self.counter(reference).increase(1);
        reference.read(record).map(Some)
    }

    /// [`read_value`](Self::read_value) rendered as a string.
    pub fn read(&self, doc_id: DocId, name: &str) -> Result<Option<String>> {
        Ok(self.read_value(doc_id, name)?.map(|value| value.to_string()))
    }

    /// Typed cursor over a single-value numeric sub-attribute.
    ///
    /// Returns `Ok(None)` for an unknown name and for types without a
    /// numeric iterator (strings, text, location, multi-values). Asking for a
    /// `T` the field does not store is an `InvalidArgument` error.
    pub fn create_iterator<T: NumericValue>(
        &self,
        name: &str,
    ) -> Result<Option<AttributeIterator<'_, T>>> {
        let Some(reference) = self.reference(name) else {
            return Ok(None);
        };
        if !reference.field_type().is_numeric() || reference.is_multi_value() {
            return Ok(None);
        }
        if !T::matches(reference.field_type()) {
            return Err(IndexlibError::invalid_argument(format!(
                "sub-attribute '{name}' stores {}, iterator requested {}",
                reference.field_type(),
                std::any::type_name::<T>()
            )));
        }
        Ok(Some(AttributeIterator::new(self, reference)))
    }

    /// Cursor rendering values as strings. `None` for an unknown name and
    /// for text and location sub-attributes.
    pub fn create_string_iterator(&self, name: &str) -> Option<StringAttributeIterator<'_>> {
        let reference = self.reference(name)?;
        if matches!(
            reference.field_type(),
            FieldType::Text | FieldType::Location
        ) {
            return None;
        }
        Some(StringAttributeIterator::new(self, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::PackAttributeWriter;
    use crate::index::partition::Document;
    use crate::index::schema::FieldConfig;
    use crate::storage::memory::MemoryStorage;

    fn build() -> (PackAttributeReader, CounterRegistry) {
        let pack = PackAttributeConfig::new("pack", vec!["price", "score", "tags", "body"]);
        let schema = Schema::new("s")
            .with_field(FieldConfig::new("price", FieldType::UInt32).nullable())
            .with_field(FieldConfig::new("score", FieldType::Float))
            .with_field(FieldConfig::new("tags", FieldType::String).multi_value())
            .with_field(FieldConfig::new("body", FieldType::Text))
            .with_pack_attribute(pack.clone());

        let mut writer =
            PackAttributeWriter::new(PackAttributeFormatter::new(&pack, &schema).unwrap());
        writer
            .add_document(
                0,
                &Document::new()
                    .with_field("price", "10")
                    .with_field("score", "0.5")
                    .with_field("tags", "a\x1Db"),
            )
            .unwrap();
        writer
            .add_document(1, &Document::new().with_field("score", "1.5"))
            .unwrap();
        let storage = MemoryStorage::new_default();
        writer.dump(&storage).unwrap();

        let counters = CounterRegistry::new();
        let reader = PackAttributeReader::open(&pack, &schema, &storage, &counters).unwrap();
        (reader, counters)
    }

    #[test]
    fn test_read_and_count() {
        let (reader, counters) = build();
        assert_eq!(reader.read(0, "price").unwrap(), Some("10".to_string()));
        assert_eq!(reader.read(0, "price").unwrap(), Some("10".to_string()));
        assert_eq!(reader.read(1, "price").unwrap(), Some(String::new()));
        assert_eq!(reader.read_value(1, "price").unwrap(), Some(AttributeValue::Null));
        assert_eq!(reader.read(0, "tags").unwrap(), Some("a\x1Db".to_string()));
        assert_eq!(reader.read(0, "unknown").unwrap(), None);
        assert_eq!(reader.read(5, "price").unwrap(), None);

        assert_eq!(counters.value("attribute.pack.price"), Some(4));
        assert_eq!(counters.value("attribute.pack.tags"), Some(1));
    }

    #[test]
    fn test_iterator_creation_rules() {
        let (reader, _) = build();
        assert!(reader.create_iterator::<u32>("price").unwrap().is_some());
        assert!(reader.create_iterator::<u32>("unknown").unwrap().is_none());
        assert!(reader.create_iterator::<u32>("tags").unwrap().is_none());
        assert!(reader.create_iterator::<u32>("body").unwrap().is_none());
        assert!(matches!(
            reader.create_iterator::<i64>("price"),
            Err(IndexlibError::InvalidArgument(_))
        ));
        assert!(reader.create_string_iterator("tags").is_some());
        assert!(reader.create_string_iterator("body").is_none());
    }

    #[test]
    fn test_corrupt_offsets() {
        let storage = MemoryStorage::new_default();
        storage.write_file(DATA_FILE, b"abc").unwrap();
        storage.write_file(OFFSET_FILE, b"xx").unwrap();
        let pack = PackAttributeConfig::new("pack", vec!["price"]);
        let schema = Schema::new("s").with_field(FieldConfig::new("price", FieldType::Int32));
        let counters = CounterRegistry::new();
        assert!(PackAttributeReader::open(&pack, &schema, &storage, &counters).is_err());
    }
}
