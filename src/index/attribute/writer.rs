use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::attribute::formatter::PackAttributeFormatter;
use crate::index::attribute::{DATA_FILE, OFFSET_FILE};
use crate::index::partition::Document;
use crate::storage::Storage;
use crate::storage::structured::StructWriter;

pub(crate) const OFFSET_MAGIC: u32 = 0x5041_4F46;
pub(crate) const OFFSET_VERSION: u32 = 1;

/// Collects pack records for one segment in docid order.
#[derive(Debug)]
pub struct PackAttributeWriter {
    formatter: PackAttributeFormatter,
    data: Vec<u8>,
    /// `offsets[i]..offsets[i + 1]` is the record of doc `i`.
    offsets: Vec<u64>,
}

impl PackAttributeWriter {
    pub fn new(formatter: PackAttributeFormatter) -> Self {
        PackAttributeWriter {
            formatter,
            data: Vec::new(),
            offsets: vec![0],
        }
    }

    pub fn formatter(&self) -> &PackAttributeFormatter {
        &self.formatter
    }

    /// Number of docs covered so far, including empty records.
    pub fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Encode the pack's fields of `document` without storing them.
    pub fn encode_document(&self, document: &Document) -> Result<Vec<u8>> {
        let values: Vec<Option<&str>> = self
            .formatter
            .sub_attribute_names()
            .map(|name| document.get(name))
            .collect();
        self.formatter.encode(&values)
    }

    /// Encode the pack's fields of `document` and store them for `doc_id`.
    pub fn add_document(&mut self, doc_id: DocId, document: &Document) -> Result<()> {
        let record = self.encode_document(document)?;
        self.add_record(doc_id, &record)
    }

    /// Store an already encoded record. Skipped docids get empty records.
    pub fn add_record(&mut self, doc_id: DocId, record: &[u8]) -> Result<()> {
        if doc_id < self.doc_count() {
            return Err(IndexlibError::invalid_argument(format!(
                "pack attribute '{}' already has a record for doc {doc_id}",
                self.formatter.pack_name()
            )));
        }
        self.pad_to(doc_id);
        self.data.extend_from_slice(record);
        self.offsets.push(self.data.len() as u64);
        Ok(())
    }

    /// Extend with empty records up to `doc_count` docs.
    pub fn pad_to(&mut self, doc_count: u32) {
        let end = self.data.len() as u64;
        while self.doc_count() < doc_count {
            self.offsets.push(end);
        }
    }

    /// Write the `data` and `offset` files.
    pub fn dump(&self, storage: &dyn Storage) -> Result<()> {
        storage.write_file(DATA_FILE, &self.data)?;

        let mut writer = StructWriter::new(storage.create_output(OFFSET_FILE)?);
        writer.write_u32(OFFSET_MAGIC)?;
        writer.write_u32(OFFSET_VERSION)?;
        writer.write_u32(self.doc_count())?;
        for offset in &self.offsets {
            writer.write_u64(*offset)?;
        }
        writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::PackAttributeReader;
    use crate::index::counter::CounterRegistry;
    use crate::index::schema::{FieldConfig, FieldType, PackAttributeConfig, Schema};
    use crate::storage::memory::MemoryStorage;

    fn setup() -> (Schema, PackAttributeConfig) {
        let pack = PackAttributeConfig::new("pack", vec!["price", "title"]);
        let schema = Schema::new("s")
            .with_field(FieldConfig::new("price", FieldType::Int64))
            .with_field(FieldConfig::new("title", FieldType::String))
            .with_pack_attribute(pack.clone());
        (schema, pack)
    }

    #[test]
    fn test_gaps_become_empty_records() {
        let (schema, pack) = setup();
        let formatter = PackAttributeFormatter::new(&pack, &schema).unwrap();
        let mut writer = PackAttributeWriter::new(formatter);

        writer
            .add_document(0, &Document::new().with_field("price", "5"))
            .unwrap();
        writer
            .add_document(2, &Document::new().with_field("title", "two"))
            .unwrap();
        assert_eq!(writer.doc_count(), 3);
        assert!(writer.add_document(1, &Document::new()).is_err());

        let storage = MemoryStorage::new_default();
        writer.dump(&storage).unwrap();

        let counters = CounterRegistry::new();
        let reader = PackAttributeReader::open(&pack, &schema, &storage, &counters).unwrap();
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.read(0, "price").unwrap(), Some("5".to_string()));
        assert_eq!(reader.read(1, "price").unwrap(), None);
        assert_eq!(reader.read(2, "title").unwrap(), Some("two".to_string()));
        assert_eq!(reader.read(2, "price").unwrap(), Some("0".to_string()));
    }
}
