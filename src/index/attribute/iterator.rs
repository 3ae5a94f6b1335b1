//! Forward cursors over one sub-attribute of a pack.

use crate::error::Result;
use crate::index::DocId;
use crate::index::attribute::formatter::AttributeReference;
use crate::index::attribute::reader::PackAttributeReader;
use crate::index::attribute::value::NumericValue;

/// Typed cursor over a single-value numeric sub-attribute.
#[derive(Debug)]
pub struct AttributeIterator<'a, T: NumericValue> {
    reader: &'a PackAttributeReader,
    reference: &'a AttributeReference,
    current: Option<T>,
}

impl<'a, T: NumericValue> AttributeIterator<'a, T> {
    pub(crate) fn new(reader: &'a PackAttributeReader, reference: &'a AttributeReference) -> Self {
        AttributeIterator {
            reader,
            reference,
            current: None,
        }
    }

    /// Position on `doc_id`. Returns `false` if the doc has no record.
    pub fn seek(&mut self, doc_id: DocId) -> Result<bool> {
        self.current = None;
        let Some(record) = self.reader.record(doc_id) else {
            return Ok(false);
        };
        self.reader.counter(self.reference).increase(1);
        self.current = self.reference.read_numeric::<T>(record)?;
        Ok(true)
    }

    /// Value at the last successful seek; `None` for null.
    pub fn value(&self) -> Option<T> {
        self.current
    }
}

/// Cursor rendering any non-text sub-attribute as a string.
#[derive(Debug)]
pub struct StringAttributeIterator<'a> {
    reader: &'a PackAttributeReader,
    reference: &'a AttributeReference,
    current: String,
}

impl<'a> StringAttributeIterator<'a> {
    pub(crate) fn new(reader: &'a PackAttributeReader, reference: &'a AttributeReference) -> Self {
        StringAttributeIterator {
            reader,
            reference,
            current: String::new(),
        }
    }

    pub fn seek(&mut self, doc_id: DocId) -> Result<bool> {
        self.current.clear();
        let Some(record) = self.reader.record(doc_id) else {
            return Ok(false);
        };
        self.reader.counter(self.reference).increase(1);
        self.current = self.reference.read(record)?.to_string();
        Ok(true)
    }

    pub fn value(&self) -> &str {
        &self.current
    }
}
