//! One-bit-per-symbol checksum plane
//!
//! A 16-bit checksum is read as a column of 16 one-bit symbols: bit `15 - r`
//! holds row `r`. Syndromes over checksums are carried widened to 17 bits
//! (`checksum << 1`), so bit `16 - r` holds row `r` and bit 0 is the
//! imaginary row. Placing a column on its diagonals is then a 17-bit right
//! rotation by the logical column index.

use crate::symbol::{IMAGINARY, M, Plane};

/// All 17 bits of a widened checksum syndrome
pub const PLANE_MASK: u32 = 0x1_FFFF;

/// Widen a checksum to 17 bits (imaginary row zero)
#[must_use]
pub const fn widen(crc: u16) -> u32 {
    (crc as u32) << 1
}

/// Drop the imaginary row of a 17-bit syndrome
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn narrow(plane: u32) -> u16 {
    ((plane >> 1) & 0xFFFF) as u16
}

/// Rotate a 17-bit value right
#[must_use]
pub const fn rotate_right_17(value: u32, count: usize) -> u32 {
    let value = value & PLANE_MASK;
    let n = (count % M) as u32;
    if n == 0 {
        value
    } else {
        ((value >> n) | (value << (M as u32 - n))) & PLANE_MASK
    }
}

/// Rotate a 17-bit value left
#[must_use]
pub const fn rotate_left_17(value: u32, count: usize) -> u32 {
    rotate_right_17(value, M - count % M)
}

/// Test bit `bit` of a value
#[must_use]
pub const fn is_bit_set(value: u32, bit: usize) -> bool {
    bit < 32 && value & (1 << bit) != 0
}

/// Contribution of column `column`'s checksum to the diagonal checksum syndrome
#[must_use]
pub const fn diagonal_shift(crc: u16, column: usize) -> u32 {
    rotate_right_17(widen(crc), column)
}

/// The checksum bits of column `column` that land on real diagonals
#[must_use]
pub const fn diagonal_mangle(crc: u16, column: usize) -> u16 {
    narrow(diagonal_shift(crc, column))
}

/// Whether column `column` puts a one on the imaginary diagonal
///
/// That bit is the column's share of the checksum S-value; it comes from
/// row `16 - column`, i.e. checksum bit `column - 1`.
#[must_use]
pub const fn s_bit(crc: u16, column: usize) -> bool {
    column % M != 0 && is_bit_set(crc as u32, column % M - 1)
}

/// Split a 17-bit syndrome into one boolean per slot (slot `d` is bit `16 - d`)
#[must_use]
pub fn to_plane(value: u32) -> Plane<bool> {
    std::array::from_fn(|slot| is_bit_set(value, IMAGINARY - slot))
}

/// Inverse of [`to_plane`]
#[must_use]
pub fn from_plane(plane: &Plane<bool>) -> u32 {
    plane
        .iter()
        .enumerate()
        .filter(|&(_, &bit)| bit)
        .fold(0, |acc, (slot, _)| acc | (1 << (IMAGINARY - slot)))
}
