//! EVENODD symbol arithmetic
//!
//! A sector's 128 data words are viewed as 16 symbols of 8 words. The
//! EVENODD matrix has `M = 17` rows per column; row 16 is imaginary and
//! always zero. Symbol `r` of logical column `c` lies on diagonal
//! `(r + c) mod M`. `M` is part of the on-disk format and must not change.

use evenodd_common::sector::{SECTOR_WORDS, Sector};
use std::ops::{BitXor, BitXorAssign};

/// Prime modulus of the EVENODD construction
pub const M: usize = 17;

/// Real symbols per sector
pub const SYMBOLS_PER_SECTOR: usize = M - 1;

/// Data words per symbol
pub const WORDS_PER_SYMBOL: usize = SECTOR_WORDS / SYMBOLS_PER_SECTOR;

/// Index of the imaginary row (and of the diagonal parity never stores)
pub const IMAGINARY: usize = M - 1;

/// One column of the EVENODD matrix, imaginary row included
pub type Plane<T> = [T; M];

/// One symbol worth of data words
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Symbol(pub [u32; WORDS_PER_SYMBOL]);

impl Symbol {
    pub const ZERO: Self = Self([0; WORDS_PER_SYMBOL]);

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }
}

impl BitXor for Symbol {
    type Output = Self;

    fn bitxor(mut self, rhs: Self) -> Self {
        self ^= rhs;
        self
    }
}

impl BitXorAssign for Symbol {
    fn bitxor_assign(&mut self, rhs: Self) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a ^= b;
        }
    }
}

/// Words of symbol `row` within a sector's data
#[must_use]
pub fn symbol_words(data: &[u32; SECTOR_WORDS], row: usize) -> &[u32] {
    &data[row * WORDS_PER_SYMBOL..(row + 1) * WORDS_PER_SYMBOL]
}

/// A sector's data as a plane (imaginary row zero)
#[must_use]
pub fn plane_of(sector: &Sector) -> Plane<Symbol> {
    let mut plane = [Symbol::ZERO; M];
    for (row, symbol) in plane.iter_mut().take(SYMBOLS_PER_SECTOR).enumerate() {
        symbol.0.copy_from_slice(symbol_words(&sector.data, row));
    }
    plane
}

/// Write the real rows of a plane into sector data
pub fn store_plane(plane: &Plane<Symbol>, data: &mut [u32; SECTOR_WORDS]) {
    for (row, symbol) in plane.iter().take(SYMBOLS_PER_SECTOR).enumerate() {
        data[row * WORDS_PER_SYMBOL..(row + 1) * WORDS_PER_SYMBOL].copy_from_slice(&symbol.0);
    }
}

/// Reduce a signed index modulo `M`
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub const fn modulo(value: isize) -> usize {
    value.rem_euclid(M as isize) as usize
}

/// Diagonal holding symbol `row` of logical column `column`
#[must_use]
pub const fn diagonal_of(row: usize, column: usize) -> usize {
    (row + column) % M
}

/// Row of logical column `column` that lies on `diagonal`
#[must_use]
pub const fn row_on_diagonal(diagonal: usize, column: usize) -> usize {
    (diagonal + M - column % M) % M
}

/// Diagonal on which column `column`'s imaginary row lands
///
/// In a syndrome missing exactly this column, that slot holds the S-value.
#[must_use]
pub const fn s_diagonal(column: usize) -> usize {
    diagonal_of(IMAGINARY, column)
}
