//! Row and diagonal syndromes
//!
//! Syndromes start at zero and every live column is XOR-folded in, in any
//! order. A data column contributes each real symbol to its row slot and to
//! its diagonal slot; row parity contributes to row slots 0..15, diagonal
//! parity to diagonal slots 0..15. The parity-of-checksums syndromes are
//! folded the same way over the one-bit checksum plane, with parity columns
//! contributing their POC (`lba_stamp`).
//!
//! With every column present, a coherent stripe has an all-zero row
//! syndrome and a diagonal syndrome whose 17 slots all equal the S-value.

use crate::backend::XorKernel;
use crate::mangle::{self, PLANE_MASK};
use crate::symbol::{IMAGINARY, M, Plane, Symbol, diagonal_of, symbol_words};
use evenodd_common::Sector;

#[derive(Clone, Debug)]
pub struct Syndromes {
    pub row: Plane<Symbol>,
    pub diag: Plane<Symbol>,
    /// Widened 17-bit checksum row syndrome
    pub csum_row: u32,
    /// Widened 17-bit checksum diagonal syndrome
    pub csum_diag: u32,
}

impl Default for Syndromes {
    fn default() -> Self {
        Self::new()
    }
}

impl Syndromes {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            row: [Symbol::ZERO; M],
            diag: [Symbol::ZERO; M],
            csum_row: 0,
            csum_diag: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Fold in data column `column` (logical); returns the raw checksum of its payload
    pub fn fold_data(&mut self, kernel: &dyn XorKernel, sector: &Sector, column: usize) -> u32 {
        let mut raw = 0;
        for r in 0..IMAGINARY {
            let src = symbol_words(&sector.data, r);
            raw ^= kernel.xor_checksum(&mut self.row[r].0, src);
            kernel.xor_into(&mut self.diag[diagonal_of(r, column)].0, src);
        }
        self.csum_row ^= mangle::widen(sector.crc);
        self.csum_diag ^= mangle::diagonal_shift(sector.crc, column);
        raw
    }

    /// Fold in the row parity column; returns the raw checksum of its payload
    pub fn fold_row_parity(&mut self, kernel: &dyn XorKernel, sector: &Sector) -> u32 {
        let mut raw = 0;
        for r in 0..IMAGINARY {
            raw ^= kernel.xor_checksum(&mut self.row[r].0, symbol_words(&sector.data, r));
        }
        self.csum_row ^= mangle::widen(sector.lba_stamp);
        raw
    }

    /// Fold in the diagonal parity column; returns the raw checksum of its payload
    pub fn fold_diag_parity(&mut self, kernel: &dyn XorKernel, sector: &Sector) -> u32 {
        let mut raw = 0;
        for d in 0..IMAGINARY {
            raw ^= kernel.xor_checksum(&mut self.diag[d].0, symbol_words(&sector.data, d));
        }
        self.csum_diag ^= mangle::widen(sector.lba_stamp);
        raw
    }

    /// Observed S-value: the diagonal syndrome's first slot
    #[must_use]
    pub const fn s_value(&self) -> Symbol {
        self.diag[0]
    }

    #[must_use]
    pub fn row_clean(&self) -> bool {
        self.row.iter().all(Symbol::is_zero)
    }

    #[must_use]
    pub fn diag_clean(&self) -> bool {
        let s_value = self.s_value();
        self.diag.iter().all(|&slot| slot == s_value)
    }

    #[must_use]
    pub const fn csum_row_clean(&self) -> bool {
        self.csum_row == 0
    }

    /// The checksum S-value is one bit, so the coherent diagonal is all zeros or all ones
    #[must_use]
    pub const fn csum_diag_clean(&self) -> bool {
        self.csum_diag == 0 || self.csum_diag == PLANE_MASK
    }

    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.row_clean() && self.diag_clean() && self.csum_row_clean() && self.csum_diag_clean()
    }

    /// Checksum row syndrome as a one-bit plane
    #[must_use]
    pub fn csum_row_plane(&self) -> Plane<bool> {
        mangle::to_plane(self.csum_row)
    }

    /// Checksum diagonal syndrome as a one-bit plane
    #[must_use]
    pub fn csum_diag_plane(&self) -> Plane<bool> {
        mangle::to_plane(self.csum_diag)
    }
}
