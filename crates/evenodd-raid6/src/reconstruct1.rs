//! Single-erasure reconstruction
//!
//! One data column is missing. Each live parity yields its own attempt at
//! the column (data plus checksum): the row attempt from the row syndrome,
//! the diagonal attempt from the diagonal syndrome. With both parities live
//! the two attempts are compared; the pattern of agreement tells which
//! attempt to keep and which parity, if any, is itself wrong.

use crate::backend::XorKernel;
use crate::eboard::ErrorKind;
use crate::mangle::{from_plane, narrow};
use crate::recover::{recover_from_diagonal, recover_from_row};
use crate::scratch::{EvalContext, RepairState};
use crate::symbol::{Plane, Symbol, store_plane};
use evenodd_common::checksum::cook;
use evenodd_common::{Error, PositionMask, Result, Sector};
use tracing::{debug, warn};

/// Both attempts agree on the data
const DATA_MATCHES: u8 = 0x8;
/// The row attempt's checksum matches its data
const RCSUM_MATCHES: u8 = 0x4;
/// The diagonal attempt's checksum matches its data
const DCSUM_MATCHES: u8 = 0x2;
/// Both attempts agree on the checksum
const CSUMS_MATCH: u8 = 0x1;
const DPARITY_DEAD: u8 = 0x10;
const RPARITY_DEAD: u8 = 0x20;

/// One reconstruction of the missing column
#[derive(Clone, Debug)]
pub struct Attempt {
    pub sector: Sector,
    /// Checksum matches the rebuilt data
    pub consistent: bool,
}

impl Attempt {
    fn new(kernel: &dyn XorKernel, plane: &Plane<Symbol>, crc: u16) -> Self {
        let mut sector = Sector::zeroed();
        store_plane(plane, &mut sector.data);
        sector.crc = crc;
        let consistent = cook(kernel.raw_checksum(&sector.data)) == crc;
        Self { sector, consistent }
    }

    /// The rebuilt column is a deliberately invalidated sector
    fn is_deliberate(&self) -> bool {
        self.sector
            .checksum_fault()
            .is_some_and(|fault| fault.is_deliberate())
    }
}

/// Agreement pattern of the two attempts
#[must_use]
pub fn compare_attempts(row: &Attempt, diag: &Attempt) -> u8 {
    let mut mask = 0;
    if row.sector.data == diag.sector.data {
        mask |= DATA_MATCHES;
    }
    if row.consistent {
        mask |= RCSUM_MATCHES;
    }
    if diag.consistent {
        mask |= DCSUM_MATCHES;
    }
    if row.sector.crc == diag.sector.crc {
        mask |= CSUMS_MATCH;
    }
    mask
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Winner {
    Row,
    Diag,
}

impl EvalContext<'_> {
    pub(crate) fn finish_reconstruct_1(&mut self) -> Result<()> {
        let reconcile = self.reconcile_data_stamps(true);
        if !reconcile.ok {
            if reconcile.needs_invalidate {
                self.eboard
                    .flag_uncorrectable(ErrorKind::Crc, 3, self.fatal_data());
                self.invalidate_and_rebuild_parity();
            }
            return Ok(());
        }

        let pos = self
            .fatal_data()
            .first()
            .ok_or_else(|| Error::precondition("single reconstruction without fatal data"))?;
        if self.reconstruct_1(pos)? {
            if self.fatal_parity().is_empty() {
                self.rebuild_parity_stamps();
                self.scratch.state = RepairState::Done;
            } else {
                self.scratch.state = RepairState::NotSet;
            }
        } else {
            if self.scratch.strip_verified {
                self.verify_rebuild_failed();
            }
            self.eboard
                .flag_uncorrectable(ErrorKind::Crc, 4, self.fatal_data());
            self.invalidate_and_rebuild_parity();
        }
        Ok(())
    }

    /// Rebuild data position `pos`; `false` when no attempt can be trusted
    fn reconstruct_1(&mut self, pos: usize) -> Result<bool> {
        let column = self.column_of(pos)?;
        let key = PositionMask::bit(pos);
        let (row, diag) = (self.row_mask(), self.diag_mask());
        let row_dead = self.scratch.fatal_key.intersects(row);
        let diag_dead = self.scratch.fatal_key.intersects(diag);
        if row_dead && diag_dead {
            return Err(Error::precondition(
                "single reconstruction with both parities fatal",
            ));
        }

        let syn = &self.scratch.syndromes;
        let row_attempt =
            Attempt::new(self.kernel, &recover_from_row(&syn.row), narrow(syn.csum_row));
        let diag_crc = from_plane(&recover_from_diagonal(&syn.csum_diag_plane(), column));
        let diag_attempt = Attempt::new(
            self.kernel,
            &recover_from_diagonal(&syn.diag, column),
            narrow(diag_crc),
        );

        let mut mask = compare_attempts(&row_attempt, &diag_attempt);
        if row_dead {
            mask |= RPARITY_DEAD;
        }
        if diag_dead {
            mask |= DPARITY_DEAD;
        }
        debug!(
            "lba {:#x}: rebuilding position {pos}, compare {mask:#04x}",
            self.stripe.lba()
        );

        if row_dead || diag_dead {
            let (attempt, csum_ok, code, coh_code) = if row_dead {
                (diag_attempt, mask & DCSUM_MATCHES != 0, 10, 2)
            } else {
                (row_attempt, mask & RCSUM_MATCHES != 0, 11, 3)
            };
            return Ok(if csum_ok {
                self.accept(pos, &attempt.sector);
                true
            } else if attempt.is_deliberate() {
                self.accept_invalidated(pos, &attempt.sector, code);
                true
            } else {
                self.eboard.flag_uncorrectable(ErrorKind::Coh, coh_code, key);
                false
            });
        }

        let accepted = match mask {
            0xF => Some(Winner::Row),
            0xC => {
                self.blame_parity(ErrorKind::PocCoh, 0, diag);
                Some(Winner::Row)
            }
            0xA => {
                self.blame_parity(ErrorKind::PocCoh, 1, row);
                Some(Winner::Diag)
            }
            0x5 => {
                self.blame_parity(ErrorKind::Coh, 11, diag);
                Some(Winner::Row)
            }
            0x4 => {
                self.eboard.flag_uncorrectable(ErrorKind::NPocCoh, 0, diag);
                self.blame_parity(ErrorKind::PocCoh, 2, diag);
                Some(Winner::Row)
            }
            0x3 => {
                self.blame_parity(ErrorKind::Coh, 1, row);
                Some(Winner::Diag)
            }
            0x2 => {
                self.eboard.flag_uncorrectable(ErrorKind::NPocCoh, 1, row);
                self.blame_parity(ErrorKind::PocCoh, 3, row);
                Some(Winner::Diag)
            }
            0x9 => {
                if row_attempt.is_deliberate() {
                    self.accept_invalidated(pos, &row_attempt.sector, 20);
                    return Ok(true);
                }
                self.eboard.clear_checksum_class(key);
                self.eboard
                    .flag_uncorrectable(ErrorKind::NPocCoh, 2, row | diag);
                None
            }
            0x8 | 0x0 | 0x1 => {
                // neither checksum matches: only a deliberately invalidated
                // column explains that; the other parity is wrong
                let (poc_kind, codes) = match mask {
                    0x8 => (ErrorKind::PocCoh, [21, 13, 22, 14, 5]),
                    0x0 => (ErrorKind::Coh, [23, 21, 24, 22, 13]),
                    _ => (ErrorKind::Coh, [25, 23, 26, 24, 16]),
                };
                if row_attempt.is_deliberate() {
                    self.accept_invalidated(pos, &row_attempt.sector, codes[0]);
                    self.eboard.flag_correctable(poc_kind, codes[1], diag);
                    self.add_fatal(diag);
                    return Ok(true);
                }
                if diag_attempt.is_deliberate() {
                    self.accept_invalidated(pos, &diag_attempt.sector, codes[2]);
                    self.eboard.flag_correctable(poc_kind, codes[3], row);
                    self.add_fatal(row);
                    return Ok(true);
                }
                if mask == 0x8 {
                    self.eboard
                        .flag_uncorrectable(ErrorKind::NPocCoh, codes[4], row | diag);
                } else {
                    self.eboard.flag_uncorrectable(ErrorKind::Coh, codes[4], key);
                }
                None
            }
            0x7 | 0x6 => {
                self.eboard.flag_uncorrectable(ErrorKind::Coh, 4, key);
                None
            }
            _ => {
                warn!(
                    "lba {:#x}: unexpected compare pattern {mask:#04x}",
                    self.stripe.lba()
                );
                self.eboard.flag_uncorrectable(ErrorKind::CohUnk, 0, key);
                None
            }
        };

        match accepted {
            Some(Winner::Row) => self.accept(pos, &row_attempt.sector),
            Some(Winner::Diag) => self.accept(pos, &diag_attempt.sector),
            None => return Ok(false),
        }
        Ok(true)
    }

    /// A parity disagrees with the accepted attempt; rebuild it afterwards
    fn blame_parity(&mut self, kind: ErrorKind, code: u16, parity: PositionMask) {
        self.eboard.flag_uncorrectable(kind, code, parity);
        self.add_fatal(parity);
    }

    /// Write a rebuilt data column with the stamps the clean parity implies
    pub(crate) fn commit_rebuilt(&mut self, pos: usize, rebuilt: &Sector) {
        let (time_stamp, write_stamp) = self.rebuilt_stamps(pos);
        let lba_stamp = self.stripe.lba_stamp();
        let sector = self.stripe.sector_mut(pos);
        sector.data = rebuilt.data;
        sector.crc = rebuilt.crc;
        sector.lba_stamp = lba_stamp;
        sector.time_stamp = time_stamp;
        sector.write_stamp = write_stamp;
    }

    fn accept(&mut self, pos: usize, rebuilt: &Sector) {
        self.commit_rebuilt(pos, rebuilt);
        self.mark_rebuilt(PositionMask::bit(pos));
    }

    /// The rebuilt column is a deliberately invalidated sector: restore it,
    /// and report it as a checksum error rather than coherency
    pub(crate) fn accept_invalidated(&mut self, pos: usize, rebuilt: &Sector, code: u16) {
        let key = PositionMask::bit(pos);
        self.commit_rebuilt(pos, rebuilt);
        self.eboard.classify_checksum_error(rebuilt, key);
        self.eboard.flag_uncorrectable(ErrorKind::Crc, code, key);
        self.eboard.m_bitmap |= key;
        self.remove_fatal(key);
        self.eboard.correct_all_non_crc_one_pos(key);
    }
}
