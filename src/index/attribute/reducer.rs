use std::sync::Arc;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::attribute::formatter::PackAttributeFormatter;
use crate::index::attribute::reader::PackAttributeReader;
use crate::index::attribute::writer::PackAttributeWriter;
use crate::index::attribute::{DATA_FILE, OFFSET_FILE};
use crate::index::counter::CounterRegistry;
use crate::index::schema::{PackAttributeConfig, Schema};
use crate::index::segment::SegmentData;
use crate::merge::reclaim_map::SegmentDocIdMap;
use crate::merge::reducer::{IndexReduceItem, IndexReducer, OutputSegment, ReduceResource};

/// Where a surviving source record goes.
#[derive(Debug, Clone, Copy)]
struct Placement {
    target: usize,
    new_local: DocId,
    old_local: DocId,
}

/// Reduce item of a pack attribute: one source segment's records.
#[derive(Debug)]
pub struct PackAttributeReduceItem {
    pack: PackAttributeConfig,
    schema: Arc<Schema>,
    reader: Option<PackAttributeReader>,
    placements: Option<Vec<Placement>>,
}

impl PackAttributeReduceItem {
    fn reader(&self) -> Result<&PackAttributeReader> {
        self.reader.as_ref().ok_or_else(|| {
            IndexlibError::inconsistent(format!(
                "pack attribute '{}' reduce item used before load",
                self.pack.name
            ))
        })
    }
}

impl IndexReduceItem for PackAttributeReduceItem {
    fn load_index(&mut self, segment: &SegmentData) -> Result<()> {
        let storage = segment.attribute_storage(&self.pack.name);
        // Merge reads are not user accesses.
        let counters = CounterRegistry::new();
        let reader = PackAttributeReader::open(&self.pack, &self.schema, storage.as_ref(), &counters)?;
        if reader.doc_count() > segment.doc_count() {
            return Err(IndexlibError::inconsistent(format!(
                "pack attribute '{}' of segment {} holds {} records for {} docs",
                self.pack.name,
                segment.segment_id(),
                reader.doc_count(),
                segment.doc_count()
            )));
        }
        self.reader = Some(reader);
        Ok(())
    }

    fn update_doc_id(&mut self, doc_id_map: &SegmentDocIdMap<'_>) -> Result<()> {
        let mut placements = Vec::with_capacity(doc_id_map.doc_count() as usize);
        for old_local in 0..doc_id_map.doc_count() {
            if let Some((target, new_local)) = doc_id_map.new_local_id(old_local) {
                placements.push(Placement {
                    target,
                    new_local,
                    old_local,
                });
            }
        }
        self.placements = Some(placements);
        Ok(())
    }
}

/// Re-places pack records at their new local docids.
#[derive(Debug, Clone)]
pub struct PackAttributeReducer {
    pack_name: String,
    pack: Option<PackAttributeConfig>,
    schema: Option<Arc<Schema>>,
}

impl PackAttributeReducer {
    pub fn new(pack_name: impl Into<String>) -> Self {
        PackAttributeReducer {
            pack_name: pack_name.into(),
            pack: None,
            schema: None,
        }
    }
}

impl IndexReducer for PackAttributeReducer {
    type Item = PackAttributeReduceItem;

    fn init(&mut self, schema: &Schema) -> Result<()> {
        let pack = schema.pack_attribute(&self.pack_name).ok_or_else(|| {
            IndexlibError::schema(format!("unknown pack attribute '{}'", self.pack_name))
        })?;
        // Fails early on layouts the formatter rejects.
        PackAttributeFormatter::new(pack, schema)?;
        self.pack = Some(pack.clone());
        self.schema = Some(Arc::new(schema.clone()));
        Ok(())
    }

    fn create_reduce_item(&self) -> PackAttributeReduceItem {
        PackAttributeReduceItem {
            pack: self
                .pack
                .clone()
                .unwrap_or_else(|| PackAttributeConfig::new(self.pack_name.clone(), Vec::<String>::new())),
            schema: self.schema.clone().unwrap_or_default(),
            reader: None,
            placements: None,
        }
    }

    fn reduce(
        &self,
        items: &[PackAttributeReduceItem],
        outputs: &[OutputSegment],
        _is_sort_merge: bool,
        resource: &ReduceResource<'_>,
    ) -> Result<()> {
        let (Some(pack), Some(schema)) = (&self.pack, &self.schema) else {
            return Err(IndexlibError::inconsistent(format!(
                "pack attribute '{}' reduced before init",
                self.pack_name
            )));
        };
        let reclaim_map = resource.reclaim_map;
        if outputs.len() != reclaim_map.target_segment_count() {
            return Err(IndexlibError::inconsistent(format!(
                "pack attribute '{}': {} outputs for {} target segments",
                self.pack_name,
                outputs.len(),
                reclaim_map.target_segment_count()
            )));
        }

        // slots[target][new_local] = (item, old_local)
        let mut slots: Vec<Vec<Option<(usize, DocId)>>> = (0..outputs.len())
            .map(|target| vec![None; reclaim_map.target_segment_doc_count(target) as usize])
            .collect();
        for (item_index, item) in items.iter().enumerate() {
            let placements = item.placements.as_ref().ok_or_else(|| {
                IndexlibError::inconsistent(format!(
                    "pack attribute '{}' reduced before docid update",
                    self.pack_name
                ))
            })?;
            for placement in placements {
                let slot = slots
                    .get_mut(placement.target)
                    .and_then(|target| target.get_mut(placement.new_local as usize))
                    .ok_or_else(|| {
                        IndexlibError::inconsistent(format!(
                            "new docid {} of target {} is out of range",
                            placement.new_local, placement.target
                        ))
                    })?;
                if slot.replace((item_index, placement.old_local)).is_some() {
                    return Err(IndexlibError::inconsistent(format!(
                        "two documents mapped to local docid {} of target {}",
                        placement.new_local, placement.target
                    )));
                }
            }
        }

        let doc_counter = resource
            .counters
            .get_or_create(&format!("merge.{}.docs", self.pack_name));
        for (output, target_slots) in outputs.iter().zip(&slots) {
            let mut writer = PackAttributeWriter::new(PackAttributeFormatter::new(pack, schema)?);
            for (new_local, slot) in target_slots.iter().enumerate() {
                let Some((item_index, old_local)) = *slot else {
                    continue;
                };
                if let Some(record) = items[item_index].reader()?.record(old_local) {
                    writer.add_record(new_local as DocId, record)?;
                    doc_counter.increase(1);
                }
            }
            writer.pad_to(target_slots.len() as u32);
            writer.dump(output.attribute_storage(&self.pack_name).as_ref())?;
        }
        Ok(())
    }

    fn estimate_memory_use(&self, segments: &[SegmentData], _is_sort_merge: bool) -> u64 {
        segments
            .iter()
            .map(|segment| {
                let storage = segment.attribute_storage(&self.pack_name);
                storage.file_size(DATA_FILE).unwrap_or(0) + storage.file_size(OFFSET_FILE).unwrap_or(0)
            })
            .sum()
    }
}
