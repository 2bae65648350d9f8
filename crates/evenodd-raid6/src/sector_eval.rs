//! Per-sector checks
//!
//! Every live sector is checked before its payload is trusted: checksum,
//! placement (data only) and stamp sanity. Any uncorrectable finding makes
//! the position fatal, which changes the state the next pass picks.

use crate::eboard::ErrorKind;
use crate::scratch::{EvalContext, RepairState};
use evenodd_common::checksum::cook;
use evenodd_common::stamps::{
    INITIAL_TSTAMP, INVALID_TSTAMP, has_all_flag, is_sentinel, is_valid_lba_stamp,
};
use evenodd_common::PositionMask;
use tracing::trace;

impl EvalContext<'_> {
    /// Check and fold every live data column
    pub(crate) fn eval_data_sectors(&mut self) {
        let positions: Vec<usize> = self.geometry.data_positions().collect();
        for (column, &pos) in positions.iter().enumerate().rev() {
            if !self.scratch.fatal_key.contains(pos) {
                self.eval_data_sector(pos, column);
            }
        }
    }

    fn eval_data_sector(&mut self, pos: usize, column: usize) {
        let key = PositionMask::bit(pos);
        let lba = self.stripe.lba();
        let offset = self.stripe.offset();
        let sector = self.stripe.sector(pos);
        let raw = self.scratch.syndromes.fold_data(self.kernel, sector, column);

        if cook(raw) != sector.crc {
            if !self.eboard.classify_checksum_error(sector, key) {
                self.eboard.flag_uncorrectable(ErrorKind::Crc, 17, key);
            }
        } else if !is_valid_lba_stamp(sector.lba_stamp, lba, offset) {
            trace!("position {pos}: lba stamp {:#06x} for lba {lba:#x}", sector.lba_stamp);
            self.eboard.crc_lba_stamp |= key;
            self.eboard.flag_uncorrectable(ErrorKind::Crc, 16, key);
        } else {
            let (ts, ws) = (sector.time_stamp, sector.write_stamp);
            if has_all_flag(ts) {
                self.eboard.flag_uncorrectable(ErrorKind::Ts, 5, key);
            } else if ws == 0 {
                // full-stripe write or never written
            } else if ws != key.bits() {
                self.eboard.flag_uncorrectable(ErrorKind::Ws, 4, key);
            } else if ts != INVALID_TSTAMP {
                self.eboard.flag_uncorrectable(ErrorKind::Ts, 6, key);
            }
        }

        self.fatal_on_sector_error(key);
    }

    /// Check every live parity column; fold it unless parity is being rebuilt
    pub(crate) fn eval_parity_sectors(&mut self) {
        let fold = self.scratch.state != RepairState::ReconstructParity;
        for (pos, row) in [
            (self.geometry.row_parity(), true),
            (self.geometry.diag_parity(), false),
        ] {
            if !self.scratch.fatal_key.contains(pos) {
                self.eval_parity_sector(pos, row, fold);
            }
        }
    }

    fn eval_parity_sector(&mut self, pos: usize, row: bool, fold: bool) {
        let key = PositionMask::bit(pos);
        let width = self.geometry.width();
        let parity = self.parity_mask();
        let sector = self.stripe.sector(pos);
        let raw = match (fold, row) {
            (true, true) => self.scratch.syndromes.fold_row_parity(self.kernel, sector),
            (true, false) => self.scratch.syndromes.fold_diag_parity(self.kernel, sector),
            (false, _) => self.kernel.raw_checksum(&sector.data),
        };

        if cook(raw) != sector.crc {
            let deliberate = self.eboard.classify_checksum_error(sector, key);
            self.eboard.flag_uncorrectable(ErrorKind::Crc, 18, key);
            if deliberate {
                // parity carries no data of its own to lose
                self.eboard.clear_checksum_class(key);
            }
        } else {
            let (ts, ws) = (sector.time_stamp, sector.write_stamp);
            let out_of_range =
                u32::from(ws) >> width != 0 || PositionMask::from_bits(ws).intersects(parity);
            if ws != 0 && out_of_range {
                self.eboard.flag_uncorrectable(ErrorKind::Ws, 5, key);
            } else if ws != 0 && has_all_flag(ts) {
                self.eboard.flag_uncorrectable(ErrorKind::Ts, 7, key);
            } else if has_all_flag(ts) && is_sentinel(ts) {
                self.eboard.flag_uncorrectable(ErrorKind::Ts, 8, key);
            } else if ts == INITIAL_TSTAMP {
                self.eboard.flag_uncorrectable(ErrorKind::Ts, 9, key);
            }
        }

        self.fatal_on_sector_error(key);
    }

    fn fatal_on_sector_error(&mut self, key: PositionMask) {
        let u = &self.eboard.uncorrectable;
        if (u.crc | u.ts | u.ws | u.ss).intersects(key) {
            self.add_fatal(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::PortableKernel;
    use crate::eboard::ErrorBoard;
    use crate::scratch::EvalContext;
    use crate::stripe::{EvalRequest, Stripe};
    use evenodd_common::sector::SECTOR_WORDS;
    use evenodd_common::stamps::{ALL_TSTAMPS, INVALID_TSTAMP};
    use evenodd_common::{EngineConfig, PositionMask, StripeGeometry};

    fn written_stripe() -> Stripe {
        let mut stripe = Stripe::new(StripeGeometry::new(6, 4, 5).unwrap(), 0x10);
        let data: Vec<[u32; SECTOR_WORDS]> = (1..=4).map(|v| [v; SECTOR_WORDS]).collect();
        stripe.write_full(&data, 0x0200).unwrap();
        stripe
    }

    fn eval(stripe: &mut Stripe) -> (PositionMask, ErrorBoard) {
        let mut eboard = ErrorBoard::new();
        let config = EngineConfig::default();
        let request = EvalRequest::new();
        let mut ctx = EvalContext::new(stripe, &mut eboard, &PortableKernel, &config, &request);
        ctx.eval_data_sectors();
        let fatal = ctx.scratch.fatal_key;
        (fatal, eboard)
    }

    #[test]
    fn test_clean_data_is_not_fatal() {
        let mut stripe = written_stripe();
        let (fatal, eboard) = eval(&mut stripe);
        assert!(fatal.is_empty());
        assert!(eboard.trace.is_empty());
    }

    #[test]
    fn test_checksum_and_placement_errors() {
        let mut stripe = written_stripe();
        stripe.sector_mut(0).data[7] ^= 0x10;
        stripe.sector_mut(1).lba_stamp ^= 0x0100;
        let (fatal, eboard) = eval(&mut stripe);
        assert_eq!(fatal, PositionMask::from_bits(0b11));
        assert_eq!(eboard.crc_lba_stamp, PositionMask::bit(1));
        assert_eq!(eboard.uncorrectable.crc, PositionMask::from_bits(0b11));
    }

    #[test]
    fn test_stamp_sanity() {
        let mut stripe = written_stripe();
        stripe.sector_mut(0).time_stamp |= ALL_TSTAMPS;
        stripe.sector_mut(1).write_stamp = 0b1000;
        stripe.sector_mut(2).write_stamp = 0b100;
        stripe.sector_mut(3).write_stamp = 0b1000;
        stripe.sector_mut(3).time_stamp = INVALID_TSTAMP;
        let (fatal, eboard) = eval(&mut stripe);
        // position 3 is a well-formed partial write
        assert_eq!(fatal, PositionMask::from_bits(0b111));
        assert_eq!(eboard.uncorrectable.ts, PositionMask::from_bits(0b101));
        assert_eq!(eboard.uncorrectable.ws, PositionMask::bit(1));
    }

    #[test]
    fn test_deliberately_invalidated_data_stays_live() {
        let mut stripe = written_stripe();
        stripe.sector_mut(2).invalidate(
            evenodd_common::InvalidReason::DataLost,
            evenodd_common::InvalidatedBy::Raid,
            0x10,
        );
        let (fatal, eboard) = eval(&mut stripe);
        assert!(fatal.is_empty());
        assert_eq!(eboard.crc_invalid, PositionMask::bit(2));
    }
}
