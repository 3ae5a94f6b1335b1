use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::RwLock;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::term_meta::TermMeta;
use crate::util::bitmap::{BYTES_PER_SLOT, SLOT_BITS, slot_count};

const INITIAL_SLOT_COUNT: usize = 4;

/// Posting state shared between a building writer and real-time readers.
///
/// The writer publishes a document in this order: grow `slots` (swapping in
/// a fresh copy under the write lock), set the bit, store `item_count`, bump
/// `doc_freq`, each with release ordering. A reader that acquires `doc_freq`
/// first is therefore guaranteed to find every counted bit in the slot array
/// it clones afterwards. See [`super::InMemBitmapDecoder`].
#[derive(Debug)]
pub struct InMemPostingState {
    doc_freq: AtomicU32,
    payload: AtomicU32,
    item_count: AtomicU32,
    slots: RwLock<Arc<Vec<AtomicU32>>>,
}

impl InMemPostingState {
    fn new() -> Self {
        InMemPostingState {
            doc_freq: AtomicU32::new(0),
            payload: AtomicU32::new(0),
            item_count: AtomicU32::new(0),
            slots: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn doc_freq(&self) -> u32 {
        self.doc_freq.load(Ordering::Acquire)
    }

    pub(crate) fn payload(&self) -> u16 {
        self.payload.load(Ordering::Relaxed) as u16
    }

    pub(crate) fn item_count(&self) -> u32 {
        self.item_count.load(Ordering::Acquire)
    }

    pub(crate) fn slots(&self) -> Arc<Vec<AtomicU32>> {
        Arc::clone(&self.slots.read())
    }
}

/// Builds the bitmap posting of one term.
///
/// Callers must finish each document exactly once, with strictly increasing
/// docids. The writer does not check this on the build path; a repeated
/// docid is counted twice in the document frequency.
#[derive(Debug)]
pub struct BitmapPostingWriter {
    state: Arc<InMemPostingState>,
    term_freq: u32,
    last_doc_id: Option<DocId>,
}

impl Default for BitmapPostingWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapPostingWriter {
    pub fn new() -> Self {
        BitmapPostingWriter {
            state: Arc::new(InMemPostingState::new()),
            term_freq: 0,
            last_doc_id: None,
        }
    }

    /// Record an occurrence of the term in the current document.
    pub fn add_position(&mut self) {
        self.term_freq += 1;
    }

    /// Occurrences recorded since the last [`end_document`](Self::end_document).
    pub fn current_term_freq(&self) -> u32 {
        self.term_freq
    }

    /// Finish the current document: set its bit and count it.
    pub fn end_document(&mut self, doc_id: DocId, payload: u16) {
        debug_assert!(self.last_doc_id.is_none_or(|last| doc_id > last));

        self.ensure_capacity(doc_id);
        let slot = (doc_id / SLOT_BITS) as usize;
        let mask = 1u32 << (doc_id % SLOT_BITS);
        self.state.slots.read()[slot].fetch_or(mask, Ordering::Release);

        let item_count = doc_id + 1;
        if item_count > self.state.item_count.load(Ordering::Relaxed) {
            self.state.item_count.store(item_count, Ordering::Release);
        }
        self.state.payload.store(payload as u32, Ordering::Relaxed);
        self.state.doc_freq.fetch_add(1, Ordering::Release);

        self.term_freq = 0;
        self.last_doc_id = Some(doc_id);
    }

    fn ensure_capacity(&mut self, doc_id: DocId) {
        let needed = (doc_id / SLOT_BITS) as usize + 1;
        let current = self.state.slots.read().len();
        if needed <= current {
            return;
        }
        let capacity = needed.max(current * 2).max(INITIAL_SLOT_COUNT);
        let mut slots = self.state.slots.write();
        let grown: Vec<AtomicU32> = (0..capacity)
            .map(|i| AtomicU32::new(slots.get(i).map_or(0, |s| s.load(Ordering::Relaxed))))
            .collect();
        *slots = Arc::new(grown);
    }

    pub fn doc_freq(&self) -> u32 {
        self.state.doc_freq.load(Ordering::Relaxed)
    }

    pub fn last_doc_id(&self) -> Option<DocId> {
        self.last_doc_id
    }

    pub fn is_empty(&self) -> bool {
        self.doc_freq() == 0
    }

    /// Handle for real-time readers of this posting.
    pub fn state(&self) -> Arc<InMemPostingState> {
        Arc::clone(&self.state)
    }

    pub fn term_meta(&self) -> TermMeta {
        TermMeta::new(self.doc_freq(), 0, self.state.payload())
    }

    fn bitmap_byte_len(&self) -> usize {
        self.last_doc_id
            .map_or(0, |last| slot_count(last + 1) * BYTES_PER_SLOT)
    }

    /// Exact number of bytes [`dump`](Self::dump) writes.
    pub fn dump_length(&self) -> usize {
        self.term_meta().dump_length() + 4 + self.bitmap_byte_len()
    }

    /// Serialize term meta, bitmap length and bitmap slots.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut buf = Vec::with_capacity(self.dump_length());
        self.term_meta().encode(&mut buf);

        let byte_len = self.bitmap_byte_len();
        buf.write_u32::<LittleEndian>(byte_len as u32)?;
        let slots = self.state.slots();
        for slot in slots.iter().take(byte_len / BYTES_PER_SLOT) {
            buf.write_u32::<LittleEndian>(slot.load(Ordering::Relaxed))?;
        }

        if buf.len() != self.dump_length() {
            return Err(IndexlibError::inconsistent(format!(
                "bitmap posting dumped {} bytes, expected {}",
                buf.len(),
                self.dump_length()
            )));
        }
        writer.write_all(&buf)?;
        Ok(buf.len())
    }
}
