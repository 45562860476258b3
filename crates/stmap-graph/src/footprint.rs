//! Storage footprint rule

use crate::block::Precision;
use crate::shape::Shape;

/// Round `bytes` up to a multiple of `alignment` (0 or 1 means unaligned)
#[must_use]
pub const fn align_up(bytes: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        bytes
    } else {
        bytes.div_ceil(alignment) * alignment
    }
}

/// Bytes a tensor occupies in a memory bank: `align_up(ceil(volume * bits / 8))`
#[must_use]
pub fn storage_bytes(shape: &Shape, precision: Precision, alignment: usize) -> usize {
    align_up(precision.bytes_for(shape.volume()), alignment)
}
