//! Verify: coherency from syndromes alone
//!
//! With nothing fatal every column has been folded, so the row syndrome must
//! be zero and every diagonal slot must equal the first one. A failure on one
//! side blames that parity. A failure on both sides could be any data
//! column; by default both parities are re-derived from the data. With
//! `exact_localization` the syndromes are first searched for the one data
//! column whose error pattern explains both.

use crate::eboard::ErrorKind;
use crate::scratch::{EvalContext, RepairState};
use crate::symbol::{M, diagonal_of, s_diagonal};
use crate::syndrome::Syndromes;
use evenodd_common::{PositionMask, StripeGeometry};
use tracing::debug;

/// Data position whose corruption alone explains both syndromes
///
/// A single corrupt column `c` with error `e` leaves `e` in the row
/// syndrome and `S ^ e[r]` in diagonal slot `r + c`; the slot holding `e`'s
/// imaginary row carries the bare S-value.
#[must_use]
pub fn localize_column(syndromes: &Syndromes, geometry: &StripeGeometry) -> Option<usize> {
    let mut found = None;
    for (column, pos) in geometry.data_positions().enumerate() {
        let pivot = syndromes.diag[s_diagonal(column)];
        let explains =
            (0..M).all(|r| syndromes.diag[diagonal_of(r, column)] ^ pivot == syndromes.row[r]);
        if explains {
            if found.is_some() {
                return None;
            }
            found = Some(pos);
        }
    }
    found
}

impl EvalContext<'_> {
    pub(crate) fn finish_verify(&mut self) {
        let syn = &self.scratch.syndromes;
        let (row_ok, diag_ok) = (syn.row_clean(), syn.diag_clean());
        let (csum_row_ok, csum_diag_ok) = (syn.csum_row_clean(), syn.csum_diag_clean());
        let (row, diag) = (self.row_mask(), self.diag_mask());

        if row_ok && diag_ok && csum_row_ok && csum_diag_ok {
            self.rebuild_parity_stamps();
            self.scratch.state = RepairState::Done;
            return;
        }
        debug!(
            "lba {:#x}: verify failed: row {row_ok} diag {diag_ok} csum row {csum_row_ok} csum diag {csum_diag_ok}",
            self.stripe.lba()
        );

        match (row_ok, diag_ok) {
            (true, true) => {}
            (false, true) => {
                self.eboard.flag_uncorrectable(ErrorKind::Coh, 6, row);
                self.add_fatal(row);
            }
            (true, false) => {
                self.eboard.flag_uncorrectable(ErrorKind::Coh, 7, diag);
                self.add_fatal(diag);
            }
            (false, false) => {
                let localized = if self.config.exact_localization {
                    localize_column(&self.scratch.syndromes, &self.geometry)
                } else {
                    None
                };
                if let Some(pos) = localized {
                    let key = PositionMask::bit(pos);
                    debug!(
                        "lba {:#x}: incoherence localized to position {pos}",
                        self.stripe.lba()
                    );
                    self.eboard.flag_uncorrectable(ErrorKind::Coh, 8, key);
                    self.add_fatal(key);
                    self.scratch.strip_verified = true;
                    self.scratch.localized = Some(pos);
                    return;
                }
                self.eboard.flag_uncorrectable(ErrorKind::Coh, 9, row | diag);
                self.add_fatal(row | diag);
            }
        }

        match (csum_row_ok, csum_diag_ok) {
            (true, true) => {}
            (false, true) => {
                self.eboard.flag_uncorrectable(ErrorKind::PocCoh, 7, row);
                self.add_fatal(row);
            }
            (true, false) => {
                self.eboard.flag_uncorrectable(ErrorKind::PocCoh, 8, diag);
                self.add_fatal(diag);
            }
            (false, false) => {
                self.eboard.flag_uncorrectable(ErrorKind::NPocCoh, 3, row | diag);
                self.add_fatal(row | diag);
            }
        }
        self.scratch.state = RepairState::NotSet;
    }

    /// A rebuild of the localized column failed: the column was not the
    /// culprit after all, so fall back to blaming both parities
    pub(crate) fn verify_rebuild_failed(&mut self) {
        let parity = self.parity_mask();
        self.eboard.flag_correctable(ErrorKind::Coh, 0, parity);
        if let Some(pos) = self.scratch.localized.take() {
            let key = PositionMask::bit(pos);
            self.eboard.uncorrectable.coh = self.eboard.uncorrectable.coh.without(key);
        }
        self.scratch.fatal_key = parity | self.scratch.initial_rebuild;
        self.eboard
            .flag_uncorrectable(ErrorKind::Crc, 2, self.scratch.initial_rebuild);
        self.scratch.strip_verified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PortableKernel;
    use crate::poc::ParityOfChecksums;
    use crate::symbol::{IMAGINARY, Plane, Symbol, plane_of, row_on_diagonal, store_plane};
    use evenodd_common::Sector;
    use evenodd_common::sector::SECTOR_WORDS;
    use rand::Rng;

    fn random_sector(rng: &mut impl Rng) -> Sector {
        let mut data = [0u32; SECTOR_WORDS];
        rng.fill(&mut data[..]);
        Sector::with_data(data)
    }

    /// Coherent syndromes over data columns and their parities, with
    /// `corrupt` (logical column) flipped after parity was computed
    fn syndromes_with_corruption(
        width: usize,
        corrupt: Option<usize>,
    ) -> (Syndromes, StripeGeometry) {
        let geometry = StripeGeometry::new(width, width - 2, width - 1).unwrap();
        let mut rng = rand::thread_rng();
        let mut data: Vec<Sector> = (0..width - 2).map(|_| random_sector(&mut rng)).collect();

        let planes: Vec<Plane<Symbol>> = data.iter().map(plane_of).collect();
        let mut s_value = Symbol::ZERO;
        for (c, plane) in planes.iter().enumerate() {
            s_value ^= plane[row_on_diagonal(IMAGINARY, c)];
        }
        let mut p = [Symbol::ZERO; M];
        let mut q = [Symbol::ZERO; M];
        let mut poc = ParityOfChecksums::new();
        for r in 0..IMAGINARY {
            q[r] = s_value;
            for (c, plane) in planes.iter().enumerate() {
                p[r] ^= plane[r];
                q[r] ^= plane[row_on_diagonal(r, c)];
            }
        }
        for (c, sector) in data.iter().enumerate() {
            poc.add(sector.crc, c);
        }
        let mut row = Sector::zeroed();
        store_plane(&p, &mut row.data);
        row.seal();
        row.lba_stamp = poc.row;
        let mut diag = Sector::zeroed();
        store_plane(&q, &mut diag.data);
        diag.seal();
        diag.lba_stamp = poc.diag;

        if let Some(c) = corrupt {
            data[c].data[rng.gen_range(0..SECTOR_WORDS)] ^= rng.gen_range(1..u32::MAX);
            data[c].seal();
        }

        let kernel = PortableKernel;
        let mut syn = Syndromes::new();
        for (c, sector) in data.iter().enumerate() {
            syn.fold_data(&kernel, sector, c);
        }
        syn.fold_row_parity(&kernel, &row);
        syn.fold_diag_parity(&kernel, &diag);
        (syn, geometry)
    }

    #[test]
    fn test_localize_corrupt_column() {
        for width in [4, 6, 16] {
            for c in 0..width - 2 {
                let (syn, geometry) = syndromes_with_corruption(width, Some(c));
                assert!(!syn.row_clean());
                assert_eq!(localize_column(&syn, &geometry), Some(c));
            }
        }
    }

    #[test]
    fn test_localize_coherent_stripe() {
        let (syn, geometry) = syndromes_with_corruption(8, None);
        assert!(syn.is_coherent());
        // every column "explains" an all-zero error, so none is singled out
        assert_eq!(localize_column(&syn, &geometry), None);
    }
}
