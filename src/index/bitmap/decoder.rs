use std::sync::atomic::{Ordering, fence};

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::bitmap::posting_writer::InMemPostingState;
use crate::index::term_meta::TermMeta;
use crate::util::bitmap::{Bitmap, BitmapIter, SLOT_BITS, slot_count};

/// A decoded bitmap posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPosting {
    term_meta: TermMeta,
    bitmap: Bitmap,
}

impl BitmapPosting {
    pub fn new(term_meta: TermMeta, bitmap: Bitmap) -> Self {
        BitmapPosting { term_meta, bitmap }
    }

    /// Decode one dumped posting. `bytes` must hold exactly one posting.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (term_meta, mut pos) = TermMeta::decode(bytes)?;
        let len_bytes = bytes
            .get(pos..pos + 4)
            .ok_or_else(|| IndexlibError::index("bitmap posting truncated before length"))?;
        let byte_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        pos += 4;
        if bytes.len() != pos + byte_len {
            return Err(IndexlibError::index(format!(
                "bitmap posting declares {byte_len} bitmap bytes, found {}",
                bytes.len() - pos
            )));
        }
        let item_count = u32::try_from(byte_len / 4 * SLOT_BITS as usize)
            .map_err(|_| IndexlibError::index("bitmap posting too large"))?;
        let bitmap = Bitmap::from_le_bytes(&bytes[pos..], item_count)?;
        Ok(BitmapPosting { term_meta, bitmap })
    }

    pub fn term_meta(&self) -> &TermMeta {
        &self.term_meta
    }

    pub fn doc_freq(&self) -> u32 {
        self.term_meta.doc_freq
    }

    pub fn payload(&self) -> u16 {
        self.term_meta.payload
    }

    /// Whether `doc_id` holds the term.
    pub fn test(&self, doc_id: DocId) -> bool {
        self.bitmap.test(doc_id)
    }

    /// First document at or after `doc_id` holding the term.
    pub fn seek(&self, doc_id: DocId) -> Option<DocId> {
        self.bitmap.next_set(doc_id)
    }

    pub fn doc_ids(&self) -> BitmapIter<'_> {
        self.bitmap.iter()
    }

    pub fn last_doc_id(&self) -> Option<DocId> {
        self.doc_ids().last()
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }
}

/// Snapshot reader over a posting that is still being built.
///
/// The snapshot is taken in [`init`](Self::init): doc freq first, then the
/// item count, then the slot array, each load ordered with acquire
/// semantics against the writer's release stores. Bits at or beyond the
/// captured item count are masked off, so later documents never leak into
/// the snapshot, and every document counted by the captured doc freq is
/// visible.
#[derive(Debug, Clone)]
pub struct InMemBitmapDecoder {
    posting: BitmapPosting,
}

impl InMemBitmapDecoder {
    pub fn init(state: &InMemPostingState) -> Self {
        let doc_freq = state.doc_freq();
        let payload = state.payload();
        fence(Ordering::Acquire);
        let item_count = state.item_count();
        let shared = state.slots();
        fence(Ordering::Acquire);

        let item_count = item_count.min((shared.len() as u32).saturating_mul(SLOT_BITS));
        let mut slots: Vec<u32> = shared
            .iter()
            .take(slot_count(item_count))
            .map(|slot| slot.load(Ordering::Acquire))
            .collect();
        let rest = item_count % SLOT_BITS;
        if rest != 0 {
            if let Some(last) = slots.last_mut() {
                *last &= (1u32 << rest) - 1;
            }
        }

        let bitmap = Bitmap::from_slots(slots, item_count).unwrap_or_default();
        InMemBitmapDecoder {
            posting: BitmapPosting::new(TermMeta::new(doc_freq, 0, payload), bitmap),
        }
    }

    pub fn posting(&self) -> &BitmapPosting {
        &self.posting
    }

    pub fn doc_freq(&self) -> u32 {
        self.posting.doc_freq()
    }

    pub fn item_count(&self) -> u32 {
        self.posting.bitmap.item_count()
    }

    pub fn test(&self, doc_id: DocId) -> bool {
        self.posting.test(doc_id)
    }

    pub fn seek(&self, doc_id: DocId) -> Option<DocId> {
        self.posting.seek(doc_id)
    }

    pub fn into_posting(self) -> BitmapPosting {
        self.posting
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;
    use crate::index::bitmap::BitmapPostingWriter;

    fn dump_and_decode(writer: &BitmapPostingWriter) -> BitmapPosting {
        let mut out = Vec::new();
        writer.dump(&mut out).unwrap();
        BitmapPosting::decode(&out).unwrap()
    }

    #[test]
    fn test_seek_scenario() {
        let mut writer = BitmapPostingWriter::new();
        for doc_id in [1, 2, 7] {
            writer.add_position();
            writer.end_document(doc_id, 0);
        }
        let posting = dump_and_decode(&writer);

        assert!(!posting.test(3));
        assert!(posting.test(7));
        assert_eq!(posting.seek(3), Some(7));
        assert_eq!(posting.seek(8), None);
        assert_eq!(posting.doc_freq(), 3);
        assert_eq!(posting.last_doc_id(), Some(7));
    }

    #[test]
    fn test_round_trip_across_slots() {
        let docs = vec![0, 5, 31, 32, 63, 64, 200, 1023];
        let mut writer = BitmapPostingWriter::new();
        for &doc_id in &docs {
            writer.end_document(doc_id, 9);
        }
        let posting = dump_and_decode(&writer);

        assert_eq!(posting.doc_ids().collect::<Vec<_>>(), docs);
        assert_eq!(posting.doc_freq() as usize, docs.len());
        assert_eq!(posting.payload(), 9);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut writer = BitmapPostingWriter::new();
        writer.end_document(40, 0);
        let mut out = Vec::new();
        writer.dump(&mut out).unwrap();

        out.push(0);
        assert!(BitmapPosting::decode(&out).is_err());
        out.truncate(out.len() - 3);
        assert!(BitmapPosting::decode(&out).is_err());
    }

    #[test]
    fn test_in_mem_snapshot() {
        let mut writer = BitmapPostingWriter::new();
        writer.end_document(3, 0);
        writer.end_document(40, 0);

        let decoder = InMemBitmapDecoder::init(&writer.state());
        writer.end_document(41, 0);

        assert_eq!(decoder.doc_freq(), 2);
        assert_eq!(decoder.item_count(), 41);
        assert!(decoder.test(40));
        assert!(!decoder.test(41));
        assert_eq!(decoder.seek(4), Some(40));
    }

    #[test]
    fn test_concurrent_growth_never_tears() {
        let mut writer = BitmapPostingWriter::new();
        let state = writer.state();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let decoder = InMemBitmapDecoder::init(&state);
                    let docs: Vec<DocId> = decoder.posting().doc_ids().collect();
                    // Every third docid is written; all counted docs must be visible.
                    assert!(docs.len() as u32 >= decoder.doc_freq());
                    assert!(docs.iter().all(|d| d % 3 == 0 && *d < decoder.item_count()));
                }
            })
        };

        for i in 0..20_000u32 {
            writer.end_document(i * 3, 0);
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();
    }
}
