use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{IndexlibError, Result};
use crate::index::bitmap::decoder::BitmapPosting;
use crate::index::bitmap::index_writer::{DICTIONARY_MAGIC, DICTIONARY_VERSION};
use crate::index::bitmap::{DICTIONARY_FILE, POSTING_FILE};
use crate::storage::structured::StructReader;
use crate::storage::{FileData, Storage};

/// Reader over a dumped bitmap index directory.
#[derive(Debug, Clone)]
pub struct BitmapIndexReader {
    dictionary: BTreeMap<String, (u64, u64)>,
    postings: FileData,
}

impl BitmapIndexReader {
    /// Load the dictionary and map the posting file.
    pub fn open(storage: &dyn Storage) -> Result<Self> {
        let data = storage.read_all(DICTIONARY_FILE)?;
        let mut reader = StructReader::new(&data[..]);
        if reader.read_u32()? != DICTIONARY_MAGIC {
            return Err(IndexlibError::index("invalid bitmap dictionary format"));
        }
        let version = reader.read_u32()?;
        if version != DICTIONARY_VERSION {
            return Err(IndexlibError::index(format!(
                "unsupported bitmap dictionary version: {version}"
            )));
        }

        let count = reader.read_varint()?;
        let mut dictionary = BTreeMap::new();
        for _ in 0..count {
            let term = reader.read_string()?;
            let offset = reader.read_varint()?;
            let length = reader.read_varint()?;
            dictionary.insert(term, (offset, length));
        }
        reader.verify_checksum()?;

        let postings = storage.read_all(POSTING_FILE)?;
        let covered = dictionary
            .values()
            .map(|(offset, length)| offset + length)
            .max()
            .unwrap_or(0);
        if covered > postings.len() as u64 {
            return Err(IndexlibError::index(format!(
                "bitmap dictionary points past posting file end ({covered} > {})",
                postings.len()
            )));
        }

        Ok(BitmapIndexReader {
            dictionary,
            postings,
        })
    }

    /// Raw dumped posting bytes of `term`.
    pub fn posting_bytes(&self, term: &str) -> Option<&[u8]> {
        self.dictionary
            .get(term)
            .map(|&(offset, length)| &self.postings[offset as usize..(offset + length) as usize])
    }

    /// Decode the posting of `term`. A missing term is `Ok(None)`.
    pub fn lookup(&self, term: &str) -> Result<Option<BitmapPosting>> {
        self.posting_bytes(term).map(BitmapPosting::decode).transpose()
    }

    /// Terms in increasing order.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.dictionary.keys().map(String::as_str)
    }

    /// Terms in `[begin, end)`; `None` bounds are open.
    pub fn terms_in_range<'a>(
        &'a self,
        begin: Option<&'a str>,
        end: Option<&'a str>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let empty = matches!((begin, end), (Some(b), Some(e)) if b >= e);
        let lower = begin.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
        (!empty)
            .then(|| self.dictionary.range::<str, _>((lower, upper)))
            .into_iter()
            .flatten()
            .map(|(term, _)| term.as_str())
    }

    /// Terms with their posting byte lengths.
    pub fn term_sizes(&self) -> impl Iterator<Item = (&str, u64)> {
        self.dictionary
            .iter()
            .map(|(term, &(_, length))| (term.as_str(), length))
    }

    pub fn term_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn posting_file_len(&self) -> u64 {
        self.postings.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bitmap::BitmapIndexWriter;
    use crate::storage::memory::MemoryStorage;

    fn build(storage: &MemoryStorage) {
        let mut writer = BitmapIndexWriter::new();
        for (doc_id, term) in ["a", "b", "c", "d"].iter().enumerate() {
            writer.add_token(term);
            writer.end_document(doc_id as u32);
        }
        writer.dump(storage).unwrap();
    }

    #[test]
    fn test_term_range() {
        let storage = MemoryStorage::new_default();
        build(&storage);
        let reader = BitmapIndexReader::open(&storage).unwrap();

        assert_eq!(
            reader.terms_in_range(Some("b"), Some("d")).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        assert_eq!(
            reader.terms_in_range(None, Some("b")).collect::<Vec<_>>(),
            vec!["a"]
        );
        assert_eq!(reader.terms_in_range(Some("c"), None).count(), 2);
        assert_eq!(reader.terms_in_range(Some("d"), Some("b")).count(), 0);
    }

    #[test]
    fn test_truncated_posting_file() {
        let storage = MemoryStorage::new_default();
        build(&storage);
        let posting = storage.read_all(POSTING_FILE).unwrap();
        storage
            .write_file(POSTING_FILE, &posting[..posting.len() - 1])
            .unwrap();

        assert!(matches!(
            BitmapIndexReader::open(&storage),
            Err(IndexlibError::Index(_))
        ));
    }
}
