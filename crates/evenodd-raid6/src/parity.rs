//! Parity computation and reconstruction
//!
//! Row parity holds the row syndrome of the data, diagonal parity the
//! diagonal syndrome with the S-value (the data on the imaginary diagonal)
//! folded into every real slot. Each parity's `lba_stamp` holds the matching
//! parity of checksums.

use crate::backend::XorKernel;
use crate::eboard::ErrorKind;
use crate::poc::ParityOfChecksums;
use crate::scratch::{EvalContext, RepairState};
use crate::stripe::Stripe;
use crate::symbol::{IMAGINARY, M, Symbol, store_plane};
use crate::syndrome::Syndromes;
use evenodd_common::checksum::cook;
use evenodd_common::stamps::{INVALID_TSTAMP, R6_INVALID_TSTAMP};
use evenodd_common::{Error, InvalidReason, InvalidatedBy, PositionMask, Result, Sector};
use tracing::{debug, warn};

/// Freshly computed parity sectors (stamps left for the caller)
#[derive(Clone, Debug)]
pub struct ComputedParity {
    pub row: Sector,
    pub diag: Sector,
}

/// Compute both parities over every data column of `stripe`
#[must_use]
pub fn compute_parity(kernel: &dyn XorKernel, stripe: &Stripe) -> ComputedParity {
    let geometry = stripe.geometry();
    let mut syn = Syndromes::new();
    let mut poc = ParityOfChecksums::new();
    for (column, pos) in geometry.data_positions().enumerate() {
        let sector = stripe.sector(pos);
        syn.fold_data(kernel, sector, column);
        poc.add(sector.crc, column);
    }

    let s_value = syn.diag[IMAGINARY];
    let mut diag = [Symbol::ZERO; M];
    for (slot, value) in diag.iter_mut().zip(syn.diag).take(IMAGINARY) {
        *slot = value ^ s_value;
    }

    ComputedParity {
        row: parity_sector(kernel, &syn.row, poc.row),
        diag: parity_sector(kernel, &diag, poc.diag),
    }
}

fn parity_sector(kernel: &dyn XorKernel, plane: &[Symbol; M], poc: u16) -> Sector {
    let mut sector = Sector::zeroed();
    store_plane(plane, &mut sector.data);
    sector.crc = cook(kernel.raw_checksum(&sector.data));
    sector.lba_stamp = poc;
    sector
}

/// Copy payload, checksum and POC; stamps stay
fn copy_payload(dst: &mut Sector, src: &Sector) {
    dst.data = src.data;
    dst.crc = src.crc;
    dst.lba_stamp = src.lba_stamp;
}

impl EvalContext<'_> {
    /// Rebuild fatal parity from the data and double-check live parity
    pub(crate) fn finish_reconstruct_parity(&mut self) -> Result<()> {
        let fatal_data = self.fatal_data();
        if !fatal_data.is_empty() {
            return Err(Error::precondition(format!(
                "parity reconstruction with fatal data {fatal_data}"
            )));
        }

        self.rebuild_parity_stamps();
        let computed = compute_parity(self.kernel, self.stripe);
        for (pos, fresh) in [
            (self.geometry.row_parity(), &computed.row),
            (self.geometry.diag_parity(), &computed.diag),
        ] {
            let key = PositionMask::bit(pos);
            let sector = self.stripe.sector_mut(pos);
            if self.scratch.fatal_key.contains(pos) {
                copy_payload(sector, fresh);
                debug!("lba {:#x}: parity {pos} rebuilt", self.stripe.lba());
                self.mark_rebuilt(key);
            } else if sector.data != fresh.data || sector.crc != fresh.crc {
                copy_payload(sector, fresh);
                self.eboard.flag_correctable(ErrorKind::Coh, 5, key);
                self.eboard.m_bitmap |= key;
            } else if sector.lba_stamp != fresh.lba_stamp {
                sector.lba_stamp = fresh.lba_stamp;
                self.eboard.flag_correctable(ErrorKind::PocCoh, 4, key);
                self.eboard.m_bitmap |= key;
            }
        }
        self.clear_initial_rebuild_crc(self.parity_mask());
        self.scratch.state = RepairState::Done;
        Ok(())
    }

    /// Overwrite data positions with the invalidated pattern
    ///
    /// Sectors that already carry a deliberate invalidation keep it.
    pub(crate) fn invalidate_sectors(&mut self, mask: PositionMask) {
        let lba = self.stripe.lba();
        let lba_stamp = self.stripe.lba_stamp();
        for pos in mask.iter() {
            let sector = self.stripe.sector_mut(pos);
            if sector.checksum_fault().is_some_and(|fault| fault.is_deliberate()) {
                continue;
            }
            sector.invalidate(InvalidReason::Verify, InvalidatedBy::Raid, lba);
            sector.lba_stamp = lba_stamp;
            sector.time_stamp = INVALID_TSTAMP;
            sector.write_stamp = 0;
            self.eboard.m_bitmap.insert(pos);
            self.scratch.invalidated.insert(pos);
        }
    }

    /// Give up on the lost data: invalidate it and, when no retry will
    /// follow, make parity consistent with what is now on the stripe
    pub(crate) fn invalidate_and_rebuild_parity(&mut self) {
        let parity = self.parity_mask();
        let uncorrectable = self.eboard.uncorrectable_mask();
        let invalid = (uncorrectable | self.scratch.fatal_key) & self.data_mask();
        warn!(
            "lba {:#x}: invalidating {} (fatal {})",
            self.stripe.lba(),
            invalid,
            self.scratch.fatal_key
        );
        self.invalidate_sectors(invalid);

        let dead_parity = self.fatal_parity();
        let remaining = uncorrectable
            .without(self.eboard.hard_media_err)
            .without(dead_parity);
        if remaining.is_empty() || self.request.final_recovery_attempt {
            let computed = compute_parity(self.kernel, self.stripe);
            for (pos, fresh) in [
                (self.geometry.row_parity(), &computed.row),
                (self.geometry.diag_parity(), &computed.diag),
            ] {
                let sector = self.stripe.sector_mut(pos);
                copy_payload(sector, fresh);
                sector.time_stamp = R6_INVALID_TSTAMP;
                sector.write_stamp = 0;
            }
            let fatal = self.scratch.fatal_key;
            self.scratch.fatal_key = parity;
            self.rebuild_parity_stamps();
            self.scratch.fatal_key = fatal;

            self.eboard.m_bitmap |= parity;
            self.remove_fatal(self.fatal_parity());
            self.eboard.correct_all_one_pos(parity);
        }
        self.eboard.clear_checksum_class(dead_parity);
        self.scratch.state = RepairState::Done;
    }
}
