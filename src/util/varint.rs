//! Variable-length integer encoding.
//!
//! 7 bits per byte, least significant group first, high bit set on every
//! byte except the last. Term metas and dictionary entries use this codec,
//! so [`encoded_len_u64`] must agree exactly with what the writers emit.

use crate::error::{IndexlibError, Result};

/// Maximum encoded size of a u32.
pub const MAX_VARINT32_LEN: usize = 5;

/// Maximum encoded size of a u64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len_u64(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len_u32(value: u32) -> usize {
    encoded_len_u64(value as u64)
}

/// Append the encoding of `value` to `out`, returning the bytes appended.
pub fn encode_u64_into(value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let mut val = value;
    loop {
        let byte = (val & 0x7F) as u8;
        val >>= 7;
        if val == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.len() - start
}

/// Encode a u64 into a fresh buffer.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoded_len_u64(value));
    encode_u64_into(value, &mut bytes);
    bytes
}

/// Decode a u64 from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if i >= MAX_VARINT64_LEN {
            return Err(IndexlibError::index("varint overflow"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }

    Err(IndexlibError::index("incomplete varint"))
}

/// Decode a u32 from the front of `bytes`.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(&bytes[..bytes.len().min(MAX_VARINT32_LEN)])?;
    let value = u32::try_from(value).map_err(|_| IndexlibError::index("varint32 overflow"))?;
    Ok((value, read))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX as u64, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len_u64(value));
        }
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encoded_len_u32(0), 1);
        assert_eq!(encoded_len_u32(127), 1);
        assert_eq!(encoded_len_u32(128), 2);
        assert_eq!(encoded_len_u32(16383), 2);
        assert_eq!(encoded_len_u32(16384), 3);
        assert_eq!(encoded_len_u32(u32::MAX), MAX_VARINT32_LEN);
        assert_eq!(encoded_len_u64(u64::MAX), MAX_VARINT64_LEN);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80]).is_err());
        assert!(decode_u32(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn test_u32_overflow() {
        let encoded = encode_u64(u32::MAX as u64 + 1);
        assert!(decode_u32(&encoded).is_err());
    }
}
