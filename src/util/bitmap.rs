//! Fixed-slot bitmap used by bitmap postings.
//!
//! Bits live in 32-bit slots; bit `i` is bit `i % 32` of slot `i / 32`.
//! The on-disk form is the little-endian byte image of the slots, which is
//! why payload lengths are always a multiple of [`BYTES_PER_SLOT`].

use crate::error::{IndexlibError, Result};

/// Bits per slot.
pub const SLOT_BITS: u32 = 32;

/// Bytes per slot in the serialized form.
pub const BYTES_PER_SLOT: usize = 4;

/// Number of slots needed to hold `item_count` bits.
pub fn slot_count(item_count: u32) -> usize {
    item_count.div_ceil(SLOT_BITS) as usize
}

/// A dense bitmap over `item_count` positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    slots: Vec<u32>,
    item_count: u32,
}

impl Bitmap {
    /// Create an all-zero bitmap covering `item_count` positions.
    pub fn new(item_count: u32) -> Self {
        Bitmap {
            slots: vec![0; slot_count(item_count)],
            item_count,
        }
    }

    /// Build a bitmap from raw slots. Bits at or past `item_count` are ignored
    /// by every query.
    pub fn from_slots(slots: Vec<u32>, item_count: u32) -> Result<Self> {
        if slots.len() < slot_count(item_count) {
            return Err(IndexlibError::index(format!(
                "bitmap of {item_count} items needs {} slots, got {}",
                slot_count(item_count),
                slots.len()
            )));
        }
        Ok(Bitmap { slots, item_count })
    }

    /// Decode a little-endian slot image.
    pub fn from_le_bytes(bytes: &[u8], item_count: u32) -> Result<Self> {
        if bytes.len() % BYTES_PER_SLOT != 0 {
            return Err(IndexlibError::index(format!(
                "bitmap payload of {} bytes is not slot aligned",
                bytes.len()
            )));
        }
        let slots = bytes
            .chunks_exact(BYTES_PER_SLOT)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_slots(slots, item_count)
    }

    /// Serialize the slots covering `item_count` positions.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(slot_count(self.item_count) * BYTES_PER_SLOT);
        for slot in &self.slots[..slot_count(self.item_count)] {
            bytes.extend_from_slice(&slot.to_le_bytes());
        }
        bytes
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots[..slot_count(self.item_count)]
    }

    /// Grow to cover at least `item_count` positions.
    pub fn expand(&mut self, item_count: u32) {
        if item_count <= self.item_count {
            return;
        }
        let needed = slot_count(item_count);
        if needed > self.slots.len() {
            self.slots.resize(needed, 0);
        }
        self.item_count = item_count;
    }

    /// Set bit `index`, growing if needed. Returns false if it was already set.
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.item_count {
            self.expand(index + 1);
        }
        let slot = &mut self.slots[(index / SLOT_BITS) as usize];
        let mask = 1u32 << (index % SLOT_BITS);
        let was_set = *slot & mask != 0;
        *slot |= mask;
        !was_set
    }

    /// Whether bit `index` is set. Out-of-range positions read as unset.
    pub fn test(&self, index: u32) -> bool {
        if index >= self.item_count {
            return false;
        }
        self.slots[(index / SLOT_BITS) as usize] & (1u32 << (index % SLOT_BITS)) != 0
    }

    /// First set position at or after `from`.
    pub fn next_set(&self, from: u32) -> Option<u32> {
        if from >= self.item_count {
            return None;
        }
        let mut slot_idx = (from / SLOT_BITS) as usize;
        let mut word = self.slots[slot_idx] & (u32::MAX << (from % SLOT_BITS));
        let last_slot = slot_count(self.item_count);
        loop {
            if word != 0 {
                let pos = slot_idx as u32 * SLOT_BITS + word.trailing_zeros();
                return (pos < self.item_count).then_some(pos);
            }
            slot_idx += 1;
            if slot_idx >= last_slot {
                return None;
            }
            word = self.slots[slot_idx];
        }
    }

    /// Number of set positions.
    pub fn count_ones(&self) -> u32 {
        let full = (self.item_count / SLOT_BITS) as usize;
        let mut count: u32 = self.slots[..full].iter().map(|s| s.count_ones()).sum();
        let rest = self.item_count % SLOT_BITS;
        if rest != 0 {
            count += (self.slots[full] & ((1u32 << rest) - 1)).count_ones();
        }
        count
    }

    /// Iterate set positions in increasing order.
    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter {
            bitmap: self,
            next: 0,
        }
    }
}

/// Iterator over the set positions of a [`Bitmap`].
pub struct BitmapIter<'a> {
    bitmap: &'a Bitmap,
    next: u32,
}

impl Iterator for BitmapIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let pos = self.bitmap.next_set(self.next)?;
        self.next = pos + 1;
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_test() {
        let mut bitmap = Bitmap::new(10);
        assert!(bitmap.set(3));
        assert!(!bitmap.set(3));
        assert!(bitmap.test(3));
        assert!(!bitmap.test(4));
        assert!(!bitmap.test(1000));
    }

    #[test]
    fn test_set_grows() {
        let mut bitmap = Bitmap::default();
        bitmap.set(70);
        assert_eq!(bitmap.item_count(), 71);
        assert_eq!(bitmap.slots().len(), 3);
        assert!(bitmap.test(70));
    }

    #[test]
    fn test_next_set_crosses_slots() {
        let mut bitmap = Bitmap::new(100);
        bitmap.set(5);
        bitmap.set(64);
        bitmap.set(99);

        assert_eq!(bitmap.next_set(0), Some(5));
        assert_eq!(bitmap.next_set(6), Some(64));
        assert_eq!(bitmap.next_set(65), Some(99));
        assert_eq!(bitmap.next_set(100), None);
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![5, 64, 99]);
        assert_eq!(bitmap.count_ones(), 3);
    }

    #[test]
    fn test_bits_past_item_count_are_ignored() {
        let bitmap = Bitmap::from_slots(vec![u32::MAX], 4).unwrap();
        assert_eq!(bitmap.count_ones(), 4);
        assert_eq!(bitmap.iter().count(), 4);
        assert!(!bitmap.test(4));
    }

    #[test]
    fn test_byte_image() {
        let mut bitmap = Bitmap::new(33);
        bitmap.set(0);
        bitmap.set(32);
        let bytes = bitmap.to_le_bytes();
        assert_eq!(bytes.len(), 8);

        let decoded = Bitmap::from_le_bytes(&bytes, 33).unwrap();
        assert_eq!(decoded, bitmap);
        assert!(Bitmap::from_le_bytes(&bytes[..3], 3).is_err());
        assert!(Bitmap::from_le_bytes(&bytes[..4], 33).is_err());
    }
}
