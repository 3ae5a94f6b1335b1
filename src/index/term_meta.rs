//! Per-term metadata stored in front of every posting.

use crate::error::{IndexlibError, Result};
use crate::util::varint;

/// Document frequency, total term frequency and payload of a term.
///
/// Bitmap postings do not track positions, so their `total_term_freq` is
/// always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermMeta {
    pub doc_freq: u32,
    pub total_term_freq: u64,
    pub payload: u16,
}

impl TermMeta {
    pub fn new(doc_freq: u32, total_term_freq: u64, payload: u16) -> Self {
        TermMeta {
            doc_freq,
            total_term_freq,
            payload,
        }
    }

    /// Exact number of bytes [`TermMeta::encode`] appends.
    pub fn dump_length(&self) -> usize {
        varint::encoded_len_u32(self.doc_freq) + varint::encoded_len_u64(self.total_term_freq) + 2
    }

    /// Append `varint(df) varint(ttf) u16-le(payload)` to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let mut written = varint::encode_u64_into(self.doc_freq as u64, out);
        written += varint::encode_u64_into(self.total_term_freq, out);
        out.extend_from_slice(&self.payload.to_le_bytes());
        written + 2
    }

    /// Decode a term meta from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(TermMeta, usize)> {
        let (doc_freq, mut pos) = varint::decode_u32(bytes)?;
        let (total_term_freq, len) = varint::decode_u64(&bytes[pos..])?;
        pos += len;
        let payload = bytes
            .get(pos..pos + 2)
            .ok_or_else(|| IndexlibError::index("term meta truncated before payload"))?;
        let payload = u16::from_le_bytes([payload[0], payload[1]]);
        Ok((
            TermMeta {
                doc_freq,
                total_term_freq,
                payload,
            },
            pos + 2,
        ))
    }
}
