#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use indexlib::index::{
    CounterRegistry, DocId, Document, FieldConfig, FieldType, IndexConfig, PackAttributeConfig,
    PartitionMeta, PartitionReader, PartitionWriter, Schema,
};
use indexlib::merge::ReducerRegistry;
use indexlib::storage::Storage;
use indexlib::storage::file::{FileStorage, FileStorageConfig};

/// One row of the product fixtures: tag, price, shop.
pub type Row = (&'static str, i64, &'static str);

pub fn product_schema() -> Schema {
    Schema::new("products")
        .with_field(FieldConfig::new("tag", FieldType::String))
        .with_field(FieldConfig::new("price", FieldType::Int64))
        .with_field(FieldConfig::new("shop", FieldType::String))
        .with_index(IndexConfig::Bitmap {
            name: "tag".to_string(),
            field: "tag".to_string(),
        })
        .with_pack_attribute(PackAttributeConfig::new("pack", vec!["price", "shop"]))
}

pub fn file_storage(path: &Path) -> Arc<dyn Storage> {
    Arc::new(FileStorage::new(path, FileStorageConfig::new(path)).unwrap())
}

pub fn document(row: &Row) -> Document {
    Document::new()
        .with_field("tag", row.0)
        .with_field("price", row.1.to_string())
        .with_field("shop", row.2)
}

/// Build and commit a partition: `rows` split into segments of
/// `segment_size` documents, then `deletes` (global docids) applied.
pub fn build_partition(
    storage: Arc<dyn Storage>,
    schema: Schema,
    meta: PartitionMeta,
    rows: &[Row],
    segment_size: usize,
    deletes: &[DocId],
    timestamp: i64,
) -> Arc<dyn Storage> {
    let mut writer =
        PartitionWriter::create(Arc::clone(&storage), schema, meta, ReducerRegistry::new()).unwrap();
    for (i, row) in rows.iter().enumerate() {
        writer.add_document(&document(row)).unwrap();
        if (i + 1) % segment_size == 0 {
            writer.dump_segment().unwrap();
        }
    }
    for &doc_id in deletes {
        assert!(writer.delete_document(doc_id).unwrap());
    }
    writer.commit(timestamp, &format!("locator-{timestamp}")).unwrap();
    storage
}

pub fn open_reader(storage: &Arc<dyn Storage>) -> PartitionReader {
    PartitionReader::open(Arc::clone(storage), Arc::new(CounterRegistry::new())).unwrap()
}

/// `price` of every live document, in docid order.
pub fn prices(reader: &PartitionReader) -> Vec<i64> {
    (0..reader.total_doc_count())
        .filter(|&doc| !reader.is_deleted(doc))
        .map(|doc| {
            reader
                .read_attribute_value(doc, "price")
                .unwrap()
                .and_then(|value| value.as_i64())
                .unwrap()
        })
        .collect()
}

/// Every file of `storage` with its content.
pub fn snapshot_files(storage: &Arc<dyn Storage>) -> Vec<(String, Vec<u8>)> {
    storage
        .list_files()
        .unwrap()
        .into_iter()
        .map(|name| {
            let data = storage.read_all(&name).unwrap().to_vec();
            (name, data)
        })
        .collect()
}
