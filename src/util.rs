//! Shared encoding helpers: varints and growable bitmaps.

pub mod bitmap;
pub mod varint;
