//! Write-ordering stamp reconciliation
//!
//! Parity columns summarize the stamps of the data they were computed from.
//! Before a rebuild trusts the surviving columns, their stamps are checked
//! against each live parity; afterwards the parity stamps are recomputed
//! from the data.

use crate::eboard::ErrorKind;
use crate::scratch::EvalContext;
use crate::stripe::Stripe;
use evenodd_common::stamps::{
    ALL_TSTAMPS, INVALID_TSTAMP, R6_INVALID_TSTAMP, has_all_flag, is_sentinel, without_all_flag,
};
use evenodd_common::{PositionMask, Sector};
use tracing::{debug, warn};

/// Stamps parity columns should carry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParityStamps {
    pub time_stamp: u16,
    pub write_stamp: u16,
}

impl ParityStamps {
    /// Summarize the data columns of `stripe`, skipping positions in `skip`
    ///
    /// The time stamp is the first real one in logical order, flagged with
    /// [`ALL_TSTAMPS`] when every data column carries it from a full-stripe
    /// write; [`R6_INVALID_TSTAMP`] when none is real. The write stamp is
    /// the OR of the data write stamps.
    #[must_use]
    pub fn derive(stripe: &Stripe, skip: PositionMask) -> Self {
        let geometry = stripe.geometry();
        let mut first = None;
        let mut write_stamp = 0;
        let mut full = 0;
        for pos in geometry.data_positions().filter(|&pos| !skip.contains(pos)) {
            let sector = stripe.sector(pos);
            write_stamp |= sector.write_stamp;
            if is_sentinel(sector.time_stamp) {
                continue;
            }
            let ts = *first.get_or_insert(sector.time_stamp);
            if sector.time_stamp == ts && sector.write_stamp == 0 {
                full += 1;
            }
        }
        let time_stamp = match first {
            None => R6_INVALID_TSTAMP,
            Some(ts) if full == geometry.data_columns() => ts | ALL_TSTAMPS,
            Some(ts) => ts,
        };
        Self {
            time_stamp,
            write_stamp,
        }
    }

    /// Time stamps a data column may carry under a parity with these stamps
    ///
    /// With the ALL flag every column took part in the write; without it a
    /// column may also be invalid from a later partial write.
    #[must_use]
    pub const fn tolerated(time_stamp: u16) -> (u16, u16) {
        if has_all_flag(time_stamp) {
            let base = without_all_flag(time_stamp);
            (base, base)
        } else {
            (time_stamp, INVALID_TSTAMP)
        }
    }

    pub(crate) fn apply(self, sector: &mut Sector) {
        sector.time_stamp = self.time_stamp;
        sector.write_stamp = self.write_stamp;
    }
}

/// Result of cross-checking stamps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reconcile {
    /// Stamps are consistent enough to rebuild from
    pub ok: bool,
    /// The stripe cannot be trusted; invalidate
    pub needs_invalidate: bool,
}

impl EvalContext<'_> {
    /// Live data positions whose stamps disagree with parity `parity_pos`
    ///
    /// When every live data column disagrees, the parity is the odd one out
    /// and the result names the parity instead.
    fn stamp_mismatches(&self, parity_pos: usize) -> PositionMask {
        let parity = self.stripe.sector(parity_pos);
        let (t1, t2) = ParityStamps::tolerated(parity.time_stamp);
        let live_data = self.live(self.data_mask());
        let bits: PositionMask = live_data
            .iter()
            .filter(|&pos| {
                let sector = self.stripe.sector(pos);
                let ts_ok = sector.time_stamp == t1 || sector.time_stamp == t2;
                let ws_ok =
                    sector.write_stamp == parity.write_stamp & PositionMask::bit(pos).bits();
                !(ts_ok && ws_ok)
            })
            .collect();
        if !live_data.is_empty() && bits == live_data {
            PositionMask::bit(parity_pos)
        } else {
            bits
        }
    }

    /// Cross-check the stamps of the surviving columns before a rebuild
    ///
    /// `single` allows one mismatch to be tolerated while a single column is
    /// being rebuilt: the mismatching position joins the fatal set and the
    /// next pass rebuilds it too.
    pub(crate) fn reconcile_data_stamps(&mut self, single: bool) -> Reconcile {
        let live_parity = self.live(self.parity_mask());
        let row = self.geometry.row_parity();
        let diag = self.geometry.diag_parity();

        let row_bits = live_parity.contains(row).then(|| self.stamp_mismatches(row));
        let diag_bits = live_parity.contains(diag).then(|| self.stamp_mismatches(diag));
        let mismatch = match (row_bits, diag_bits) {
            (Some(r), Some(d)) if r == d => r,
            (Some(r), Some(_)) if r.is_empty() => PositionMask::bit(diag),
            (Some(_), Some(d)) if d.is_empty() => PositionMask::bit(row),
            (Some(r), Some(d)) => r | d,
            (Some(bits), None) | (None, Some(bits)) => bits,
            (None, None) => PositionMask::EMPTY,
        };
        self.scratch.stamp_source = [(row, row_bits), (diag, diag_bits)]
            .into_iter()
            .find(|(_, bits)| bits.is_some_and(PositionMask::is_empty))
            .map(|(pos, _)| pos);

        if mismatch.is_empty() {
            return Reconcile {
                ok: true,
                needs_invalidate: false,
            };
        }

        let data = mismatch & self.data_mask();
        let parity = mismatch & self.parity_mask();
        self.eboard.flag_correctable(ErrorKind::Ts, 12, data);
        self.eboard.flag_correctable(ErrorKind::Ts, 13, parity);
        debug!("lba {:#x}: stamp mismatch {}", self.stripe.lba(), mismatch);

        if single && self.scratch.fatal_count() == 1 && mismatch.count() == 1 {
            self.scratch.stamp_mismatch = mismatch;
            self.add_fatal(mismatch);
            return Reconcile {
                ok: !parity.is_empty(),
                needs_invalidate: false,
            };
        }

        warn!(
            "lba {:#x}: stamp mismatch {} with fatal {} cannot be tolerated",
            self.stripe.lba(),
            mismatch,
            self.scratch.fatal_key
        );
        Reconcile {
            ok: false,
            needs_invalidate: true,
        }
    }

    /// Stamps a column rebuilt at `pos` takes from the clean parity
    pub(crate) fn rebuilt_stamps(&self, pos: usize) -> (u16, u16) {
        self.scratch.stamp_source.map_or((INVALID_TSTAMP, 0), |source| {
            let parity = self.stripe.sector(source);
            let (_, ts) = ParityStamps::tolerated(parity.time_stamp);
            (ts, parity.write_stamp & PositionMask::bit(pos).bits())
        })
    }

    /// Recompute parity stamps from the live data and bring the parity
    /// columns in line
    ///
    /// Data columns from the last full-stripe write that lost their time
    /// stamp (e.g. rebuilt under a parity without the ALL flag) get it back.
    /// Fatal parity columns take the stamps silently; live ones that differ
    /// are corrected and reported.
    pub(crate) fn rebuild_parity_stamps(&mut self) {
        let fatal = self.scratch.fatal_key;
        let mut stamps = ParityStamps::derive(self.stripe, fatal);
        let lba_stamp = self.stripe.lba_stamp();

        if !is_sentinel(stamps.time_stamp) {
            let ts = without_all_flag(stamps.time_stamp);
            let stale: PositionMask = self
                .geometry
                .data_positions()
                .filter(|&pos| !fatal.contains(pos))
                .filter(|&pos| {
                    let sector = self.stripe.sector(pos);
                    sector.write_stamp == 0 && sector.checksum_ok() && sector.time_stamp != ts
                })
                .collect();
            for pos in stale.iter() {
                let sector = self.stripe.sector_mut(pos);
                sector.time_stamp = ts;
                sector.lba_stamp = lba_stamp;
            }
            self.eboard.flag_correctable(ErrorKind::Ts, 10, stale);
            self.eboard.m_bitmap |= stale;
            if !stale.is_empty() {
                stamps = ParityStamps::derive(self.stripe, fatal);
            }
        } else if let Some(pos) = self
            .live(self.parity_mask())
            .iter()
            .find(|&pos| !is_sentinel(self.stripe.sector(pos).time_stamp))
        {
            // keep a parity time stamp no data column contradicts
            stamps.time_stamp = without_all_flag(self.stripe.sector(pos).time_stamp);
        }

        for pos in self.parity_mask().iter() {
            let key = PositionMask::bit(pos);
            let sector = self.stripe.sector_mut(pos);
            if fatal.contains(pos) {
                stamps.apply(sector);
                continue;
            }
            let ts_bad = sector.time_stamp != stamps.time_stamp;
            let ws_bad = sector.write_stamp != stamps.write_stamp;
            if ts_bad || ws_bad {
                stamps.apply(sector);
                self.eboard.m_bitmap |= key;
            }
            if ts_bad {
                self.eboard.flag_correctable(ErrorKind::Ts, 11, key);
            }
            if ws_bad {
                self.eboard.flag_correctable(ErrorKind::Ws, 6, key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PortableKernel;
    use crate::eboard::ErrorBoard;
    use crate::stripe::EvalRequest;
    use evenodd_common::sector::SECTOR_WORDS;
    use evenodd_common::{EngineConfig, StripeGeometry};

    fn written_stripe() -> Stripe {
        let mut stripe = Stripe::new(StripeGeometry::new(6, 4, 5).unwrap(), 0x20);
        let data: Vec<[u32; SECTOR_WORDS]> = (1..=4).map(|v| [v; SECTOR_WORDS]).collect();
        stripe.write_full(&data, 0x0300).unwrap();
        let stamps = ParityStamps::derive(&stripe, PositionMask::EMPTY);
        for pos in [4, 5] {
            stamps.apply(stripe.sector_mut(pos));
        }
        stripe
    }

    #[test]
    fn test_derive_full_write() {
        let stripe = written_stripe();
        let stamps = ParityStamps::derive(&stripe, PositionMask::EMPTY);
        assert_eq!(stamps.time_stamp, 0x0300 | ALL_TSTAMPS);
        assert_eq!(stamps.write_stamp, 0);

        // a skipped column means not every column is known to carry it
        let stamps = ParityStamps::derive(&stripe, PositionMask::bit(1));
        assert_eq!(stamps.time_stamp, 0x0300);
    }

    #[test]
    fn test_derive_partial_writes() {
        let mut stripe = written_stripe();
        stripe.write_partial(1, [7; SECTOR_WORDS]).unwrap();
        let stamps = ParityStamps::derive(&stripe, PositionMask::EMPTY);
        assert_eq!(stamps.time_stamp, 0x0300);
        assert_eq!(stamps.write_stamp, 0b10);

        let mut fresh = Stripe::new(StripeGeometry::new(6, 4, 5).unwrap(), 0x20);
        fresh.write_partial(0, [7; SECTOR_WORDS]).unwrap();
        let stamps = ParityStamps::derive(&fresh, PositionMask::EMPTY);
        assert_eq!(stamps.time_stamp, R6_INVALID_TSTAMP);
        assert_eq!(stamps.write_stamp, 0b1);
    }

    #[test]
    fn test_tolerated() {
        assert_eq!(ParityStamps::tolerated(0x0300 | ALL_TSTAMPS), (0x0300, 0x0300));
        assert_eq!(ParityStamps::tolerated(0x0300), (0x0300, INVALID_TSTAMP));
    }

    fn with_ctx<R>(
        stripe: &mut Stripe,
        fatal: PositionMask,
        f: impl FnOnce(&mut EvalContext<'_>) -> R,
    ) -> (R, ErrorBoard) {
        let mut eboard = ErrorBoard::new();
        let config = EngineConfig::default();
        let request = EvalRequest::new().with_no_data(fatal);
        let result = {
            let mut ctx = EvalContext::new(stripe, &mut eboard, &PortableKernel, &config, &request);
            f(&mut ctx)
        };
        (result, eboard)
    }

    #[test]
    fn test_reconcile_clean() {
        let mut stripe = written_stripe();
        let (result, eboard) = with_ctx(&mut stripe, PositionMask::bit(0), |ctx| {
            let r = ctx.reconcile_data_stamps(true);
            (r, ctx.rebuilt_stamps(0))
        });
        assert!(result.0.ok);
        assert_eq!(result.1, (0x0300, 0));
        assert!(eboard.trace.is_empty());
    }

    #[test]
    fn test_reconcile_tolerates_one_torn_column() {
        let mut stripe = written_stripe();
        stripe.write_partial(2, [9; SECTOR_WORDS]).unwrap();
        let (result, _) = with_ctx(&mut stripe, PositionMask::bit(0), |ctx| {
            let r = ctx.reconcile_data_stamps(true);
            (r, ctx.scratch.stamp_mismatch, ctx.scratch.fatal_key)
        });
        assert_eq!(
            result.0,
            Reconcile {
                ok: false,
                needs_invalidate: false
            }
        );
        assert_eq!(result.1, PositionMask::bit(2));
        assert_eq!(result.2, PositionMask::from_bits(0b101));
    }

    #[test]
    fn test_reconcile_two_mismatches_fail_closed() {
        let mut stripe = written_stripe();
        stripe.write_partial(1, [9; SECTOR_WORDS]).unwrap();
        stripe.write_partial(2, [9; SECTOR_WORDS]).unwrap();
        let (result, _) = with_ctx(&mut stripe, PositionMask::bit(0), |ctx| {
            ctx.reconcile_data_stamps(true)
        });
        assert!(result.needs_invalidate);

        let mut stripe = written_stripe();
        stripe.write_partial(2, [9; SECTOR_WORDS]).unwrap();
        let (result, _) = with_ctx(&mut stripe, PositionMask::from_bits(0b11), |ctx| {
            ctx.reconcile_data_stamps(false)
        });
        assert!(result.needs_invalidate);
    }

    #[test]
    fn test_reconcile_blames_lagging_parity() {
        let mut stripe = written_stripe();
        stripe.sector_mut(5).time_stamp = 0x0123 | ALL_TSTAMPS;
        let (result, _) = with_ctx(&mut stripe, PositionMask::bit(0), |ctx| {
            let r = ctx.reconcile_data_stamps(true);
            (r, ctx.scratch.fatal_key, ctx.scratch.stamp_source)
        });
        assert!(result.0.ok);
        assert_eq!(result.1, PositionMask::from_bits(0b10_0001));
        assert_eq!(result.2, Some(4));
    }

    #[test]
    fn test_rebuild_parity_stamps_corrects_live_parity() {
        let mut stripe = written_stripe();
        stripe.sector_mut(4).write_stamp = 0b1;
        stripe.sector_mut(5).time_stamp = INVALID_TSTAMP;
        stripe.sector_mut(1).time_stamp = INVALID_TSTAMP;
        let (_, eboard) = with_ctx(&mut stripe, PositionMask::EMPTY, |ctx| {
            ctx.rebuild_parity_stamps();
        });
        assert_eq!(stripe.sector(1).time_stamp, 0x0300);
        assert_eq!(stripe.sector(4).write_stamp, 0);
        assert_eq!(stripe.sector(5).time_stamp, 0x0300 | ALL_TSTAMPS);
        assert_eq!(eboard.correctable.ts, PositionMask::from_bits(0b10_0010));
        assert_eq!(eboard.correctable.ws, PositionMask::bit(4));
        assert_eq!(eboard.m_bitmap, PositionMask::from_bits(0b11_0010));
    }
}
