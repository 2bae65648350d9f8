//! Never-written stripes
//!
//! A freshly bound stripe holds the canonical zeroed pattern everywhere,
//! including on parity. Running the algebra over it would flag the parity
//! checksums as incoherent, so such a stripe is recognised up front and any
//! missing column is rematerialized with the pattern directly.

use crate::eboard::ErrorKind;
use crate::poc::ParityOfChecksums;
use crate::scratch::{EvalContext, RepairState};
use evenodd_common::stamps::{INVALID_TSTAMP, is_valid_lba_stamp};
use evenodd_common::{PositionMask, Sector, ZEROED_SECTOR_CHECKSUM};
use tracing::debug;

impl EvalContext<'_> {
    /// POC a zeroed parity at `pos` may carry besides 0
    fn zeroed_poc(&self, pos: usize) -> u16 {
        let poc = ParityOfChecksums::zeroed(self.geometry.data_columns());
        if pos == self.geometry.row_parity() {
            poc.row
        } else {
            poc.diag
        }
    }

    fn is_zeroed_parity(&self, pos: usize) -> bool {
        let sector = self.stripe.sector(pos);
        sector.data_is_zero()
            && sector.crc == ZEROED_SECTOR_CHECKSUM
            && sector.time_stamp == INVALID_TSTAMP
            && sector.write_stamp == 0
            && (sector.lba_stamp == 0 || sector.lba_stamp == self.zeroed_poc(pos))
    }

    /// Recognise and repair a never-written stripe
    ///
    /// Returns `true` when the stripe was handled here and the state machine
    /// is done.
    pub(crate) fn handle_zeroed_strip(&mut self) -> bool {
        if self.fatal_parity().count() > 1 || self.fatal_data().count() > 1 {
            return false;
        }
        let live_parity = self.live(self.parity_mask());
        if !live_parity.iter().all(|pos| self.is_zeroed_parity(pos)) {
            return false;
        }
        let live_data = self.live(self.data_mask());
        let written = live_data.iter().any(|pos| {
            let sector = self.stripe.sector(pos);
            sector.checksum_ok() && !sector.data_is_zero()
        });
        if written {
            return false;
        }
        debug!(
            "lba {:#x}: zeroed stripe, fatal {}",
            self.stripe.lba(),
            self.scratch.fatal_key
        );

        let (lba, offset) = (self.stripe.lba(), self.stripe.offset());
        for pos in live_data.iter() {
            let key = PositionMask::bit(pos);
            let mut modified = false;
            let sector = self.stripe.sector(pos).clone();
            if !sector.data_is_zero() || sector.crc != ZEROED_SECTOR_CHECKSUM {
                if self.eboard.classify_checksum_error(&sector, key) {
                    continue;
                }
                let fixed = self.stripe.sector_mut(pos);
                fixed.data = Sector::zeroed().data;
                fixed.crc = ZEROED_SECTOR_CHECKSUM;
                self.eboard.flag_correctable(ErrorKind::Crc, 30, key);
                modified = true;
            }
            if !is_valid_lba_stamp(sector.lba_stamp, lba, offset) {
                self.stripe.sector_mut(pos).lba_stamp = 0;
                self.eboard.crc_lba_stamp |= key;
                self.eboard.flag_correctable(ErrorKind::Crc, 31, key);
                modified = true;
            }
            if sector.time_stamp != INVALID_TSTAMP {
                self.stripe.sector_mut(pos).time_stamp = INVALID_TSTAMP;
                self.eboard.flag_correctable(ErrorKind::Ts, 20, key);
                modified = true;
            }
            if sector.write_stamp != 0 {
                self.stripe.sector_mut(pos).write_stamp = 0;
                self.eboard.flag_correctable(ErrorKind::Ws, 10, key);
                modified = true;
            }
            if modified {
                self.eboard.m_bitmap |= key;
            }
        }

        // a rematerialized parity follows the surviving one's POC convention
        let with_poc = live_parity
            .first()
            .is_some_and(|pos| self.stripe.sector(pos).lba_stamp != 0);
        let fatal = self.scratch.fatal_key;
        for pos in fatal.iter() {
            let mut sector = Sector::zeroed();
            if self.geometry.is_parity(pos) && with_poc {
                sector.lba_stamp = self.zeroed_poc(pos);
            }
            *self.stripe.sector_mut(pos) = sector;
        }
        self.mark_rebuilt(fatal);
        self.scratch.zeroed = true;
        self.scratch.state = RepairState::Done;
        true
    }
}
