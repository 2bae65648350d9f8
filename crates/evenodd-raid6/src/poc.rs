//! Parity of checksums
//!
//! Each parity column stores, in its `lba_stamp`, the EVENODD parity of the
//! data columns' checksums viewed as one-bit symbol planes: row POC is the
//! XOR of the checksums, diagonal POC applies the diagonal rule including
//! the S component.

use crate::mangle::{diagonal_mangle, s_bit};
use evenodd_common::ZEROED_SECTOR_CHECKSUM;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParityOfChecksums {
    pub row: u16,
    pub diag: u16,
}

impl ParityOfChecksums {
    #[must_use]
    pub const fn new() -> Self {
        Self { row: 0, diag: 0 }
    }

    /// Fold in the checksum of logical data column `column`
    pub const fn add(&mut self, crc: u16, column: usize) {
        self.row ^= crc;
        self.diag ^= diagonal_mangle(crc, column);
        if s_bit(crc, column) {
            self.diag ^= 0xFFFF;
        }
    }

    /// POC of a stripe whose `data_columns` data columns were never written
    #[must_use]
    pub const fn zeroed(data_columns: usize) -> Self {
        let mut poc = Self::new();
        let mut column = 0;
        while column < data_columns {
            poc.add(ZEROED_SECTOR_CHECKSUM, column);
            column += 1;
        }
        poc
    }
}
