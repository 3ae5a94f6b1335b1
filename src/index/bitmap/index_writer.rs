use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use ahash::AHashSet;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::bitmap::posting_writer::{BitmapPostingWriter, InMemPostingState};
use crate::index::bitmap::{DICTIONARY_FILE, POSTING_FILE};
use crate::index::schema::{FieldType, MULTI_VALUE_SEPARATOR};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};

pub(crate) const DICTIONARY_MAGIC: u32 = 0x4249_4458; // "BIDX"
pub(crate) const DICTIONARY_VERSION: u32 = 1;

/// Split a raw field value into the tokens a bitmap index records.
///
/// Text is split on whitespace; strings are split into their values.
pub fn tokenize(field_type: FieldType, value: &str) -> Vec<&str> {
    match field_type {
        FieldType::Text => value.split_whitespace().collect(),
        _ => value
            .split(MULTI_VALUE_SEPARATOR)
            .filter(|token| !token.is_empty())
            .collect(),
    }
}

/// In-memory bitmap index of a building segment.
#[derive(Debug, Default)]
pub struct BitmapIndexWriter {
    postings: BTreeMap<String, BitmapPostingWriter>,
    current_terms: AHashSet<String>,
}

impl BitmapIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `term` in the current document.
    pub fn add_token(&mut self, term: &str) {
        match self.postings.get_mut(term) {
            Some(writer) => writer.add_position(),
            None => {
                let mut writer = BitmapPostingWriter::new();
                writer.add_position();
                self.postings.insert(term.to_string(), writer);
            }
        }
        if !self.current_terms.contains(term) {
            self.current_terms.insert(term.to_string());
        }
    }

    /// Tokenize and add a raw field value.
    pub fn add_field(&mut self, field_type: FieldType, value: &str) {
        for token in tokenize(field_type, value) {
            self.add_token(token);
        }
    }

    /// Finish the current document for every term it contained.
    pub fn end_document(&mut self, doc_id: DocId) {
        for term in self.current_terms.drain() {
            if let Some(writer) = self.postings.get_mut(&term) {
                writer.end_document(doc_id, 0);
            }
        }
    }

    /// Shared posting state of `term`, for real-time readers.
    pub fn posting_state(&self, term: &str) -> Option<Arc<InMemPostingState>> {
        self.postings.get(term).map(BitmapPostingWriter::state)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Write `dictionary` and `posting` into `storage`.
    pub fn dump(&self, storage: &dyn Storage) -> Result<()> {
        let mut file_writer = BitmapIndexFileWriter::create(storage)?;
        for (term, writer) in &self.postings {
            file_writer.add_posting(term, writer)?;
        }
        file_writer.close()?;
        Ok(())
    }
}

/// Streams postings of increasing terms into a bitmap index directory.
///
/// The posting file is written as postings arrive; dictionary entries
/// (term, offset, length) are collected and written on [`close`](Self::close).
pub struct BitmapIndexFileWriter {
    posting: Box<dyn StorageOutput>,
    dictionary: Box<dyn StorageOutput>,
    entries: Vec<(String, u64, u64)>,
    offset: u64,
}

impl BitmapIndexFileWriter {
    pub fn create(storage: &dyn Storage) -> Result<Self> {
        Ok(BitmapIndexFileWriter {
            posting: storage.create_output(POSTING_FILE)?,
            dictionary: storage.create_output(DICTIONARY_FILE)?,
            entries: Vec::new(),
            offset: 0,
        })
    }

    fn check_order(&self, term: &str) -> Result<()> {
        if let Some((last, _, _)) = self.entries.last() {
            if last.as_str() >= term {
                return Err(IndexlibError::invalid_argument(format!(
                    "bitmap terms must be added in increasing order: '{term}' after '{last}'"
                )));
            }
        }
        Ok(())
    }

    /// Dump `writer` as the posting of `term`.
    pub fn add_posting(&mut self, term: &str, writer: &BitmapPostingWriter) -> Result<()> {
        self.check_order(term)?;
        let expected = writer.dump_length() as u64;
        let written = writer.dump(&mut self.posting)? as u64;
        if written != expected {
            return Err(IndexlibError::inconsistent(format!(
                "posting of '{term}' dumped {written} bytes, dump length says {expected}"
            )));
        }
        self.entries.push((term.to_string(), self.offset, written));
        self.offset += written;
        Ok(())
    }

    /// Append an already dumped posting.
    pub fn add_raw_posting(&mut self, term: &str, bytes: &[u8]) -> Result<()> {
        self.check_order(term)?;
        self.posting.write_all(bytes)?;
        self.entries.push((term.to_string(), self.offset, bytes.len() as u64));
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Number of postings added so far.
    pub fn term_count(&self) -> usize {
        self.entries.len()
    }

    /// Publish both files. Returns the number of terms written.
    pub fn close(self) -> Result<usize> {
        let BitmapIndexFileWriter {
            mut posting,
            dictionary,
            entries,
            offset,
        } = self;
        if posting.position() != offset {
            return Err(IndexlibError::inconsistent(format!(
                "posting file holds {} bytes, dictionary covers {offset}",
                posting.position()
            )));
        }
        posting.flush()?;
        posting.close()?;

        let mut writer = StructWriter::new(dictionary);
        writer.write_u32(DICTIONARY_MAGIC)?;
        writer.write_u32(DICTIONARY_VERSION)?;
        writer.write_varint(entries.len() as u64)?;
        for (term, offset, length) in &entries {
            writer.write_string(term)?;
            writer.write_varint(*offset)?;
            writer.write_varint(*length)?;
        }
        writer.close()?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bitmap::{BitmapIndexReader, InMemBitmapDecoder};
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize(FieldType::Text, " red  blue\tred "), vec!["red", "blue", "red"]);
        assert_eq!(
            tokenize(FieldType::String, "a b\x1Dc"),
            vec!["a b", "c"]
        );
        assert!(tokenize(FieldType::String, "").is_empty());
    }

    #[test]
    fn test_write_and_read_index() {
        let mut writer = BitmapIndexWriter::new();
        writer.add_field(FieldType::Text, "red shoe red");
        writer.end_document(0);
        writer.add_field(FieldType::Text, "blue shoe");
        writer.end_document(1);
        writer.end_document(2);
        writer.add_field(FieldType::Text, "red");
        writer.end_document(3);

        let storage = MemoryStorage::new_default();
        writer.dump(&storage).unwrap();

        let reader = BitmapIndexReader::open(&storage).unwrap();
        assert_eq!(reader.terms().collect::<Vec<_>>(), vec!["blue", "red", "shoe"]);
        let red = reader.lookup("red").unwrap().unwrap();
        assert_eq!(red.doc_ids().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(red.doc_freq(), 2);
        assert!(reader.lookup("green").unwrap().is_none());
    }

    #[test]
    fn test_real_time_view() {
        let mut writer = BitmapIndexWriter::new();
        writer.add_token("hot");
        writer.end_document(5);

        let state = writer.posting_state("hot").unwrap();
        assert!(InMemBitmapDecoder::init(&state).test(5));
        assert!(writer.posting_state("cold").is_none());
    }

    #[test]
    fn test_terms_must_increase() {
        let storage = MemoryStorage::new_default();
        let mut file_writer = BitmapIndexFileWriter::create(&storage).unwrap();
        let mut posting = BitmapPostingWriter::new();
        posting.end_document(0, 0);

        file_writer.add_posting("b", &posting).unwrap();
        assert!(file_writer.add_posting("a", &posting).is_err());
        assert!(file_writer.add_posting("b", &posting).is_err());
    }
}
