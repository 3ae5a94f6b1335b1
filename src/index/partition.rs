//! Partition directories: building segments from documents and reading a
//! committed version.
//!
//! A partition holds its schema, format version and partition meta at the
//! root, one directory per segment, and one `version.<id>` file per commit.
//! Global docids number the documents of a version's segments in segment
//! order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::attribute::{
    AttributeValue, PackAttributeFormatter, PackAttributeReader, PackAttributeWriter,
};
use crate::index::bitmap::{BitmapIndexReader, BitmapIndexWriter, InMemBitmapDecoder};
use crate::index::counter::CounterRegistry;
use crate::index::deletion::DeletionMap;
use crate::index::schema::{FieldType, IndexConfig, Schema};
use crate::index::segment::{
    ATTRIBUTE_DIR, INDEX_DIR, SegmentData, SegmentId, SegmentInfo, segment_dir_name,
};
use crate::index::version::{
    INDEX_FORMAT_VERSION_FILE, IndexFormatVersion, PARTITION_META_FILE, PartitionMeta,
    SCHEMA_FILE, Version, load_json, store_json,
};
use crate::merge::registry::{CustomizedIndexer, ReducerRegistry};
use crate::storage::{Storage, sub_storage};

/// A document to index: raw field values by field name. Multi-values are
/// joined with [`MULTI_VALUE_SEPARATOR`](crate::index::schema::MULTI_VALUE_SEPARATOR).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`add_field`](Self::add_field).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_field(name, value);
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Schema, format version and partition meta of a partition directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDescriptor {
    pub schema: Schema,
    pub format_version: IndexFormatVersion,
    pub meta: PartitionMeta,
}

impl PartitionDescriptor {
    pub fn new(schema: Schema, meta: PartitionMeta) -> Self {
        PartitionDescriptor {
            schema,
            format_version: IndexFormatVersion::default(),
            meta,
        }
    }

    /// Load the root files of an existing partition.
    pub fn load(storage: &dyn Storage) -> Result<Self> {
        if !storage.file_exists(SCHEMA_FILE) {
            return Err(IndexlibError::schema(format!(
                "partition has no {SCHEMA_FILE}"
            )));
        }
        let schema: Schema = load_json(storage, SCHEMA_FILE)?;
        let format_version = if storage.file_exists(INDEX_FORMAT_VERSION_FILE) {
            load_json(storage, INDEX_FORMAT_VERSION_FILE)?
        } else {
            IndexFormatVersion::default()
        };
        let meta = if storage.file_exists(PARTITION_META_FILE) {
            load_json(storage, PARTITION_META_FILE)?
        } else {
            PartitionMeta::default()
        };
        Ok(PartitionDescriptor {
            schema,
            format_version,
            meta,
        })
    }

    /// Write the root files into an empty partition, or check that an
    /// existing partition carries exactly these.
    pub fn prepare(&self, storage: &dyn Storage) -> Result<()> {
        if !storage.file_exists(SCHEMA_FILE) {
            store_json(storage, SCHEMA_FILE, &self.schema)?;
            store_json(storage, INDEX_FORMAT_VERSION_FILE, &self.format_version)?;
            store_json(storage, PARTITION_META_FILE, &self.meta)?;
            return Ok(());
        }
        let existing = Self::load(storage)?;
        self.check_compatible(&existing, "existing partition")
    }

    /// Schema, format version and meta must all be equal.
    pub fn check_compatible(&self, other: &PartitionDescriptor, what: &str) -> Result<()> {
        if self.schema != other.schema {
            return Err(IndexlibError::schema(format!(
                "schema '{}' of {what} differs from schema '{}'",
                other.schema.name, self.schema.name
            )));
        }
        if self.format_version != other.format_version {
            return Err(IndexlibError::schema(format!(
                "index format version {} of {what} differs from {}",
                other.format_version.index_format_version,
                self.format_version.index_format_version
            )));
        }
        if self.meta != other.meta {
            return Err(IndexlibError::schema(format!(
                "partition meta of {what} differs: {:?} vs {:?}",
                other.meta, self.meta
            )));
        }
        Ok(())
    }
}

/// Highest segment id with a directory in `storage`, committed or not.
pub(crate) fn max_segment_dir_id(storage: &dyn Storage) -> Result<Option<SegmentId>> {
    Ok(storage
        .list_files()?
        .iter()
        .filter_map(|name| name.split('/').next()?.strip_prefix("segment_")?.parse().ok())
        .max())
}

/// Open the segments of `version`, assigning consecutive global bases.
pub(crate) fn open_segments(storage: &Arc<dyn Storage>, version: &Version) -> Result<Vec<SegmentData>> {
    let mut base_doc_id: DocId = 0;
    let mut segments = Vec::with_capacity(version.segment_ids.len());
    for &segment_id in &version.segment_ids {
        let segment = SegmentData::open(storage, segment_id, base_doc_id)?;
        base_doc_id = base_doc_id.checked_add(segment.doc_count()).ok_or_else(|| {
            IndexlibError::index(format!(
                "version {} holds more than {} documents",
                version.version_id,
                DocId::MAX
            ))
        })?;
        segments.push(segment);
    }
    Ok(segments)
}

struct BitmapFieldWriter {
    index_name: String,
    field: String,
    field_type: FieldType,
    writer: BitmapIndexWriter,
}

struct CustomizedFieldWriter {
    index_name: String,
    fields: Vec<String>,
    indexer: Box<dyn CustomizedIndexer>,
}

/// The segment currently receiving documents.
struct BuildingSegment {
    segment_id: SegmentId,
    doc_count: u32,
    deleted: BTreeSet<DocId>,
    bitmaps: Vec<BitmapFieldWriter>,
    customized: Vec<CustomizedFieldWriter>,
    packs: Vec<PackAttributeWriter>,
}

impl BuildingSegment {
    fn new(segment_id: SegmentId, schema: &Schema, registry: &ReducerRegistry) -> Result<Self> {
        let mut bitmaps = Vec::new();
        let mut customized = Vec::new();
        for index in &schema.indexes {
            match index {
                IndexConfig::Bitmap { name, field } => {
                    let field_type = schema
                        .field(field)
                        .map(|f| f.field_type)
                        .ok_or_else(|| IndexlibError::schema(format!("unknown field '{field}'")))?;
                    bitmaps.push(BitmapFieldWriter {
                        index_name: name.clone(),
                        field: field.clone(),
                        field_type,
                        writer: BitmapIndexWriter::new(),
                    });
                }
                IndexConfig::Customized { name, fields, .. } => {
                    customized.push(CustomizedFieldWriter {
                        index_name: name.clone(),
                        fields: fields.clone(),
                        indexer: registry.create_indexer(index)?,
                    });
                }
            }
        }
        let packs = schema
            .pack_attributes
            .iter()
            .map(|pack| Ok(PackAttributeWriter::new(PackAttributeFormatter::new(pack, schema)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(BuildingSegment {
            segment_id,
            doc_count: 0,
            deleted: BTreeSet::new(),
            bitmaps,
            customized,
            packs,
        })
    }

    /// Pack records are encoded before any writer is touched, so a document
    /// with an unparsable attribute leaves no trace. Customized indexers run
    /// next and must not keep state for a document they reject.
    fn add_document(&mut self, document: &Document) -> Result<DocId> {
        let doc_id = self.doc_count;
        let records = self
            .packs
            .iter()
            .map(|pack| pack.encode_document(document))
            .collect::<Result<Vec<_>>>()?;
        for custom in &mut self.customized {
            let values: Vec<Option<&str>> = custom.fields.iter().map(|f| document.get(f)).collect();
            custom.indexer.add_document(doc_id, &values)?;
        }
        for bitmap in &mut self.bitmaps {
            if let Some(value) = document.get(&bitmap.field) {
                bitmap.writer.add_field(bitmap.field_type, value);
            }
            bitmap.writer.end_document(doc_id);
        }
        for (pack, record) in self.packs.iter_mut().zip(&records) {
            pack.add_record(doc_id, record)?;
        }
        self.doc_count += 1;
        Ok(doc_id)
    }

    fn dump(&mut self, storage: &Arc<dyn Storage>, timestamp: i64, locator: &str) -> Result<()> {
        for bitmap in &self.bitmaps {
            let index = sub_storage(storage, &format!("{INDEX_DIR}/{}", bitmap.index_name));
            bitmap.writer.dump(index.as_ref())?;
        }
        for custom in &self.customized {
            let index = sub_storage(storage, &format!("{INDEX_DIR}/{}", custom.index_name));
            custom.indexer.dump(index.as_ref())?;
        }
        for pack in &mut self.packs {
            pack.pad_to(self.doc_count);
            let attribute =
                sub_storage(storage, &format!("{ATTRIBUTE_DIR}/{}", pack.formatter().pack_name()));
            pack.dump(attribute.as_ref())?;
        }

        let mut deletion_map = DeletionMap::new(self.doc_count);
        for &doc_id in &self.deleted {
            deletion_map.delete(doc_id)?;
        }
        deletion_map.store(storage.as_ref())?;

        // Written last: a segment directory without it is not sealed.
        SegmentInfo {
            segment_id: self.segment_id,
            doc_count: self.doc_count,
            timestamp,
            locator: locator.to_string(),
            merged: false,
        }
        .store(storage.as_ref())
    }
}

/// Builds segments of one partition and commits versions.
pub struct PartitionWriter {
    storage: Arc<dyn Storage>,
    descriptor: PartitionDescriptor,
    registry: ReducerRegistry,
    version: Option<Version>,
    segments: Vec<SegmentData>,
    dirty_segments: BTreeSet<usize>,
    building: Option<BuildingSegment>,
    next_segment_id: SegmentId,
}

impl std::fmt::Debug for PartitionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionWriter")
            .field("schema", &self.descriptor.schema.name)
            .field("version", &self.version.as_ref().map(|v| v.version_id))
            .field("segments", &self.segments.len())
            .field("building_docs", &self.building.as_ref().map(|b| b.doc_count))
            .finish()
    }
}

impl PartitionWriter {
    /// Initialise `storage` as a partition of `schema`, or continue an
    /// existing partition with the same schema and meta.
    pub fn create(
        storage: Arc<dyn Storage>,
        schema: Schema,
        meta: PartitionMeta,
        registry: ReducerRegistry,
    ) -> Result<Self> {
        schema.validate()?;
        let descriptor = PartitionDescriptor::new(schema, meta);
        descriptor.prepare(storage.as_ref())?;
        Self::with_descriptor(storage, descriptor, registry)
    }

    /// Continue writing an existing partition.
    pub fn open(storage: Arc<dyn Storage>, registry: ReducerRegistry) -> Result<Self> {
        let descriptor = PartitionDescriptor::load(storage.as_ref())?;
        descriptor.schema.validate()?;
        Self::with_descriptor(storage, descriptor, registry)
    }

    fn with_descriptor(
        storage: Arc<dyn Storage>,
        descriptor: PartitionDescriptor,
        registry: ReducerRegistry,
    ) -> Result<Self> {
        for index in &descriptor.schema.indexes {
            if let IndexConfig::Customized { module, name, .. } = index {
                if !registry.contains(module) {
                    return Err(IndexlibError::config(format!(
                        "no module '{module}' registered for customized index '{name}'"
                    )));
                }
            }
        }

        let version = Version::load_latest(storage.as_ref())?;
        let segments = match &version {
            Some(version) => open_segments(&storage, version)?,
            None => Vec::new(),
        };
        let next_segment_id = max_segment_dir_id(storage.as_ref())?.map_or(0, |id| id + 1);
        log::debug!(
            "partition writer opened at version {:?} with {} segments",
            version.as_ref().map(|v| v.version_id),
            segments.len()
        );
        Ok(PartitionWriter {
            storage,
            descriptor,
            registry,
            version,
            segments,
            dirty_segments: BTreeSet::new(),
            building: None,
            next_segment_id,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.descriptor.schema
    }

    pub fn partition_meta(&self) -> &PartitionMeta {
        &self.descriptor.meta
    }

    /// The last committed version.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn segments(&self) -> &[SegmentData] {
        &self.segments
    }

    fn sealed_doc_count(&self) -> u32 {
        self.segments.last().map_or(0, |s| s.base_doc_id() + s.doc_count())
    }

    /// Documents in sealed and building segments.
    pub fn doc_count(&self) -> u32 {
        self.sealed_doc_count() + self.building.as_ref().map_or(0, |b| b.doc_count)
    }

    /// Index `document` and return its global docid.
    pub fn add_document(&mut self, document: &Document) -> Result<DocId> {
        for name in document.field_names() {
            if self.descriptor.schema.field(name).is_none() {
                return Err(IndexlibError::invalid_argument(format!(
                    "document field '{name}' is not in schema '{}'",
                    self.descriptor.schema.name
                )));
            }
        }
        let base = self.sealed_doc_count();
        let opened = self.building.is_none();
        if opened {
            let segment =
                BuildingSegment::new(self.next_segment_id, &self.descriptor.schema, &self.registry)?;
            self.next_segment_id += 1;
            self.building = Some(segment);
        }
        let building = self
            .building
            .as_mut()
            .ok_or_else(|| IndexlibError::inconsistent("no building segment"))?;
        match building.add_document(document) {
            Ok(local) => Ok(base + local),
            Err(e) => {
                // A rejected first document must not leave an empty segment behind.
                if opened {
                    self.building = None;
                    self.next_segment_id -= 1;
                }
                Err(e)
            }
        }
    }

    /// Mark global docid `doc_id` deleted. Returns `false` if it already was.
    pub fn delete_document(&mut self, doc_id: DocId) -> Result<bool> {
        let sealed = self.sealed_doc_count();
        let total = self.doc_count();
        if doc_id >= total {
            return Err(IndexlibError::invalid_argument(format!(
                "docid {doc_id} is beyond the {total} documents of the partition"
            )));
        }
        if doc_id >= sealed {
            let building = self
                .building
                .as_mut()
                .ok_or_else(|| IndexlibError::inconsistent("no building segment"))?;
            return Ok(building.deleted.insert(doc_id - sealed));
        }
        let index = self
            .segments
            .partition_point(|s| s.base_doc_id() + s.doc_count() <= doc_id);
        let segment = &mut self.segments[index];
        let local = doc_id - segment.base_doc_id();
        let deleted = segment.deletion_map_mut().delete(local)?;
        if deleted {
            self.dirty_segments.insert(index);
        }
        Ok(deleted)
    }

    /// Snapshot of `term`'s posting in the building segment, readable while
    /// documents keep arriving. Docids are local to the building segment.
    pub fn building_posting(&self, index_name: &str, term: &str) -> Option<InMemBitmapDecoder> {
        let building = self.building.as_ref()?;
        let bitmap = building.bitmaps.iter().find(|b| b.index_name == index_name)?;
        let state = bitmap.writer.posting_state(term)?;
        Some(InMemBitmapDecoder::init(&state))
    }

    /// Seal the building segment. Returns its id, or `None` when no
    /// document was added since the last dump.
    pub fn dump_segment(&mut self) -> Result<Option<SegmentId>> {
        let Some(mut building) = self.building.take() else {
            return Ok(None);
        };
        let segment_id = building.segment_id;
        let storage = sub_storage(&self.storage, &segment_dir_name(segment_id));
        let timestamp = chrono::Utc::now().timestamp_micros();
        building.dump(&storage, timestamp, "")?;

        let segment = SegmentData::open(&self.storage, segment_id, self.sealed_doc_count())?;
        log::info!(
            "dumped segment {segment_id} with {} documents",
            segment.doc_count()
        );
        self.segments.push(segment);
        Ok(Some(segment_id))
    }

    /// Seal the building segment, persist deletions and write a new version.
    pub fn commit(&mut self, timestamp: i64, locator: &str) -> Result<Version> {
        self.dump_segment()?;
        for &index in &self.dirty_segments {
            let segment = &self.segments[index];
            segment.deletion_map().store(segment.storage().as_ref())?;
        }
        self.dirty_segments.clear();

        let version_id = match Version::list(self.storage.as_ref())?.last() {
            Some(&last) => last + 1,
            None => 0,
        };
        let version = Version {
            version_id,
            segment_ids: self.segments.iter().map(SegmentData::segment_id).collect(),
            timestamp,
            locator: locator.to_string(),
            shard_count: self.version.as_ref().map_or(1, |v| v.shard_count),
        };
        version.store(self.storage.as_ref())?;
        self.storage.sync()?;
        log::info!(
            "committed version {version_id} with {} segments",
            version.segment_ids.len()
        );
        self.version = Some(version.clone());
        Ok(version)
    }
}

/// Read view of one committed version of a partition.
#[derive(Debug)]
pub struct PartitionReader {
    descriptor: PartitionDescriptor,
    version: Version,
    segments: Vec<SegmentData>,
    bitmaps: AHashMap<String, Vec<BitmapIndexReader>>,
    packs: AHashMap<String, Vec<PackAttributeReader>>,
    counters: Arc<CounterRegistry>,
}

impl PartitionReader {
    /// Open the newest version.
    pub fn open(storage: Arc<dyn Storage>, counters: Arc<CounterRegistry>) -> Result<Self> {
        let version = Version::load_latest(storage.as_ref())?
            .ok_or_else(|| IndexlibError::index("partition has no committed version"))?;
        Self::open_at(storage, version, counters)
    }

    pub fn open_version(
        storage: Arc<dyn Storage>,
        version_id: u32,
        counters: Arc<CounterRegistry>,
    ) -> Result<Self> {
        let version = Version::load(storage.as_ref(), version_id)?;
        Self::open_at(storage, version, counters)
    }

    fn open_at(
        storage: Arc<dyn Storage>,
        version: Version,
        counters: Arc<CounterRegistry>,
    ) -> Result<Self> {
        let descriptor = PartitionDescriptor::load(storage.as_ref())?;
        let segments = open_segments(&storage, &version)?;

        let mut bitmaps = AHashMap::new();
        for index in &descriptor.schema.indexes {
            if let IndexConfig::Bitmap { name, .. } = index {
                let readers = segments
                    .iter()
                    .map(|segment| BitmapIndexReader::open(segment.index_storage(name).as_ref()))
                    .collect::<Result<Vec<_>>>()?;
                bitmaps.insert(name.clone(), readers);
            }
        }
        let mut packs = AHashMap::new();
        for pack in &descriptor.schema.pack_attributes {
            let readers = segments
                .iter()
                .map(|segment| {
                    PackAttributeReader::open(
                        pack,
                        &descriptor.schema,
                        segment.attribute_storage(&pack.name).as_ref(),
                        &counters,
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            packs.insert(pack.name.clone(), readers);
        }

        Ok(PartitionReader {
            descriptor,
            version,
            segments,
            bitmaps,
            packs,
            counters,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.descriptor.schema
    }

    pub fn descriptor(&self) -> &PartitionDescriptor {
        &self.descriptor
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn segments(&self) -> &[SegmentData] {
        &self.segments
    }

    pub fn counters(&self) -> &Arc<CounterRegistry> {
        &self.counters
    }

    pub fn total_doc_count(&self) -> u32 {
        self.segments.last().map_or(0, |s| s.base_doc_id() + s.doc_count())
    }

    pub fn live_doc_count(&self) -> u32 {
        self.segments.iter().map(|s| s.deletion_map().live_count()).sum()
    }

    /// Segment index and local docid of global `doc_id`.
    pub fn resolve(&self, doc_id: DocId) -> Option<(usize, DocId)> {
        let index = self
            .segments
            .partition_point(|s| s.base_doc_id() + s.doc_count() <= doc_id);
        let segment = self.segments.get(index)?;
        segment
            .contains(doc_id)
            .then(|| (index, doc_id - segment.base_doc_id()))
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.resolve(doc_id)
            .is_some_and(|(index, local)| self.segments[index].deletion_map().is_deleted(local))
    }

    /// Live global docids containing `term`. `Ok(None)` for an unknown
    /// bitmap index.
    pub fn bitmap_lookup(&self, index_name: &str, term: &str) -> Result<Option<Vec<DocId>>> {
        let Some(readers) = self.bitmaps.get(index_name) else {
            return Ok(None);
        };
        let mut doc_ids = Vec::new();
        for (segment, reader) in self.segments.iter().zip(readers) {
            let Some(posting) = reader.lookup(term)? else {
                continue;
            };
            doc_ids.extend(
                posting
                    .doc_ids()
                    .filter(|&local| !segment.deletion_map().is_deleted(local))
                    .map(|local| segment.base_doc_id() + local),
            );
        }
        Ok(Some(doc_ids))
    }

    /// Pack attribute reader of segment `segment_index`.
    pub fn pack_reader(&self, pack_name: &str, segment_index: usize) -> Option<&PackAttributeReader> {
        self.packs.get(pack_name)?.get(segment_index)
    }

    /// Value of `field` for live global docid `doc_id`. `Ok(None)` when the
    /// field is not packed, the doc is deleted or has no record.
    pub fn read_attribute_value(&self, doc_id: DocId, field: &str) -> Result<Option<AttributeValue>> {
        let Some(pack) = self.descriptor.schema.pack_attribute_of(field) else {
            return Ok(None);
        };
        let Some((index, local)) = self.resolve(doc_id) else {
            return Ok(None);
        };
        if self.segments[index].deletion_map().is_deleted(local) {
            return Ok(None);
        }
        match self.pack_reader(&pack.name, index) {
            Some(reader) => reader.read_value(local, field),
            None => Ok(None),
        }
    }

    pub fn read_attribute(&self, doc_id: DocId, field: &str) -> Result<Option<String>> {
        Ok(self
            .read_attribute_value(doc_id, field)?
            .map(|value| value.to_string()))
    }
}
