//! Structured file I/O for binary index metadata.
//!
//! Dictionary, offset and deletion-map files are written through a
//! [`StructWriter`], which keeps a running CRC32 over every byte and appends it
//! as a little-endian trailer on close. [`StructReader`] recomputes the same
//! checksum so a truncated or corrupted file is reported instead of decoded.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{IndexlibError, Result};
use crate::storage::StorageOutput;
use crate::util::varint::{self, MAX_VARINT64_LEN};

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u16 value (little-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = varint::encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a string with varint length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Bytes written so far, excluding the checksum trailer.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the checksum trailer and publish the file.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        self.writer.close()
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: Read> {
    reader: R,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<R: Read> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Self {
        StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u16 value (little-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::with_capacity(MAX_VARINT64_LEN);
        loop {
            let byte = self.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
            if bytes.len() >= MAX_VARINT64_LEN {
                return Err(IndexlibError::index("varint too long"));
            }
        }
        let (value, _) = varint::decode_u64(&bytes)?;
        Ok(value)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| IndexlibError::index(format!("invalid UTF-8: {e}")))
    }

    /// Read length-prefixed bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        self.read_raw(len)
    }

    /// Read exactly `length` raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the checksum trailer and compare it with the bytes consumed.
    pub fn verify_checksum(mut self) -> Result<()> {
        let expected = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>().map_err(|e| {
            IndexlibError::index(format!("missing checksum trailer at {}: {e}", self.position))
        })?;
        if stored != expected {
            return Err(IndexlibError::index(format!(
                "checksum mismatch: stored {stored:#010x}, computed {expected:#010x}"
            )));
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            IndexlibError::index(format!("truncated structured file at {}: {e}", self.position))
        })?;
        self.hasher.update(buf);
        self.position += buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_primitives_with_checksum() {
        let storage = MemoryStorage::new_default();

        let mut writer = StructWriter::new(storage.create_output("dictionary").unwrap());
        writer.write_u8(7).unwrap();
        writer.write_u16(513).unwrap();
        writer.write_u32(0xDEAD_BEEF).unwrap();
        writer.write_u64(u64::MAX - 1).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("title").unwrap();
        assert_eq!(writer.position(), 1 + 2 + 4 + 8 + 2 + 6);
        writer.close().unwrap();

        let data = storage.read_all("dictionary").unwrap();
        let mut reader = StructReader::new(&data[..]);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 513);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "title");
        reader.verify_checksum().unwrap();
    }

    #[test]
    fn test_corruption_detected() {
        let storage = MemoryStorage::new_default();
        let mut writer = StructWriter::new(storage.create_output("offset").unwrap());
        writer.write_u64(42).unwrap();
        writer.close().unwrap();

        let mut bytes = storage.read_all("offset").unwrap().to_vec();
        bytes[0] ^= 0xFF;
        let mut reader = StructReader::new(&bytes[..]);
        reader.read_u64().unwrap();
        assert!(reader.verify_checksum().is_err());
    }

    #[test]
    fn test_truncated_file() {
        let mut reader = StructReader::new(&[1u8, 2][..]);
        assert!(reader.read_u32().is_err());
    }
}
