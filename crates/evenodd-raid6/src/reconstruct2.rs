//! Double-erasure reconstruction
//!
//! Two data columns are missing and both parities are live. The pair is
//! recovered together by the zig-zag chain over the row and diagonal
//! syndromes, on the data plane and on the one-bit checksum plane alike;
//! each rebuilt column must then match its own recovered checksum.

use crate::eboard::ErrorKind;
use crate::mangle::{from_plane, narrow};
use crate::recover::recover_pair;
use crate::scratch::{EvalContext, RepairState};
use crate::symbol::{Plane, Symbol, store_plane};
use evenodd_common::checksum::cook;
use evenodd_common::{Error, PositionMask, Result, Sector};
use tracing::debug;

impl EvalContext<'_> {
    pub(crate) fn finish_reconstruct_2(&mut self) -> Result<()> {
        if !self.reconcile_data_stamps(false).ok {
            self.eboard
                .flag_uncorrectable(ErrorKind::Crc, 6, self.fatal_data());
            self.invalidate_and_rebuild_parity();
            return Ok(());
        }

        let [Some(first), Some(second)] = self.scratch.rebuild_pos else {
            return Err(Error::precondition(format!(
                "double reconstruction with rebuild positions {:?}",
                self.scratch.rebuild_pos
            )));
        };
        let (i, j) = (self.column_of(first)?, self.column_of(second)?);

        let syn = &self.scratch.syndromes;
        let (data_i, data_j) = recover_pair(&syn.row, &syn.diag, i, j);
        let (crc_i, crc_j) =
            recover_pair(&syn.csum_row_plane(), &syn.csum_diag_plane(), i, j);

        let rebuilt = [
            (first, rebuilt_sector(&data_i, narrow(from_plane(&crc_i))), 13, 5),
            (second, rebuilt_sector(&data_j, narrow(from_plane(&crc_j))), 14, 6),
        ];

        let mut tolerated = false;
        for (pos, sector, crc_code, poc_code) in rebuilt {
            if !self.scratch.fatal_key.contains(pos) {
                continue;
            }
            let key = PositionMask::bit(pos);
            if cook(self.kernel.raw_checksum(&sector.data)) == sector.crc {
                self.commit_rebuilt(pos, &sector);
                self.mark_rebuilt(key);
            } else if sector
                .checksum_fault()
                .is_some_and(|fault| fault.is_deliberate())
            {
                self.accept_invalidated(pos, &sector, crc_code);
            } else if self.scratch.stamp_mismatch.contains(pos) {
                // the torn column keeps what is on disk; parity follows it
                debug!(
                    "lba {:#x}: keeping torn position {pos} as written",
                    self.stripe.lba()
                );
                self.remove_fatal(key);
                self.eboard.withdraw_correctable(ErrorKind::Ts, key);
                tolerated = true;
            } else {
                self.eboard
                    .flag_uncorrectable(ErrorKind::PocCoh, poc_code, key);
            }
        }

        if self.fatal_data().is_empty() {
            self.eboard.raid6_correct_all();
            if tolerated {
                self.add_fatal(self.parity_mask());
                self.scratch.state = RepairState::NotSet;
            } else {
                self.rebuild_parity_stamps();
                self.scratch.state = RepairState::Done;
            }
        } else {
            self.eboard
                .flag_uncorrectable(ErrorKind::Crc, 5, self.fatal_data());
            self.invalidate_and_rebuild_parity();
        }
        Ok(())
    }
}

fn rebuilt_sector(plane: &Plane<Symbol>, crc: u16) -> Sector {
    let mut sector = Sector::zeroed();
    store_plane(plane, &mut sector.data);
    sector.crc = crc;
    sector
}
