//! Per-evaluation scratch state
//!
//! One [`EvalContext`] is built for each call to
//! [`Raid6Engine::evaluate`](crate::Raid6Engine::evaluate) and dropped when
//! it returns. It borrows the stripe, the caller's error board and the
//! engine's kernel; the state machine's own bookkeeping lives in
//! [`Scratch`]. The stages of the state machine add their own `impl`
//! blocks in `verify`, `reconstruct1`, `reconstruct2`, `parity`, `stamps`,
//! `zeroed` and `sector_eval`.

use crate::backend::XorKernel;
use crate::eboard::{ErrorBoard, ErrorKind};
use crate::stripe::{EvalRequest, Stripe};
use crate::syndrome::Syndromes;
use evenodd_common::{EngineConfig, Error, PositionMask, Result, StripeGeometry};
use std::fmt;
use tracing::{debug, trace};

/// Repair state machine states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairState {
    /// Re-entry point: classify the fatal set again
    NotSet,
    Verify,
    Reconstruct1,
    Reconstruct2,
    ReconstructParity,
    Done,
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSet => "not-set",
            Self::Verify => "verify",
            Self::Reconstruct1 => "reconstruct-1",
            Self::Reconstruct2 => "reconstruct-2",
            Self::ReconstructParity => "reconstruct-parity",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// State machine bookkeeping for one evaluation
#[derive(Clone, Debug)]
pub struct Scratch {
    /// Positions unavailable or known bad
    pub fatal_key: PositionMask,
    /// Up to two positions being rebuilt: data in logical order, then row
    /// parity, then diagonal parity
    pub rebuild_pos: [Option<usize>; 2],
    /// Positions the caller asked to rebuild
    pub initial_rebuild: PositionMask,
    pub state: RepairState,
    pub syndromes: Syndromes,
    /// A verify pass pinned the incoherence on one data column
    pub strip_verified: bool,
    /// Column found by exact localization
    pub localized: Option<usize>,
    /// The one stamp mismatch tolerated during single-erasure recovery
    pub stamp_mismatch: PositionMask,
    /// Live parity whose stamps rebuilt columns inherit
    pub stamp_source: Option<usize>,
    /// Data positions overwritten with the invalidated pattern
    pub invalidated: PositionMask,
    /// Recognised as never written and settled with the canonical pattern
    pub zeroed: bool,
}

impl Scratch {
    /// Fatal set from the caller's request
    #[must_use]
    pub fn new(request: &EvalRequest) -> Self {
        let rebuild = request.rebuild_mask();
        let fatal_key = rebuild
            | request.media_errors.without(rebuild)
            | request.retry_errors
            | request.no_data;
        Self {
            fatal_key,
            rebuild_pos: [None, None],
            initial_rebuild: rebuild,
            state: RepairState::NotSet,
            syndromes: Syndromes::new(),
            strip_verified: false,
            localized: None,
            stamp_mismatch: PositionMask::EMPTY,
            stamp_source: None,
            invalidated: PositionMask::EMPTY,
            zeroed: false,
        }
    }

    #[must_use]
    pub const fn fatal_count(&self) -> usize {
        self.fatal_key.count()
    }
}

/// Everything one evaluation works on
pub struct EvalContext<'a> {
    pub stripe: &'a mut Stripe,
    pub eboard: &'a mut ErrorBoard,
    pub kernel: &'a dyn XorKernel,
    pub config: &'a EngineConfig,
    pub request: &'a EvalRequest,
    pub geometry: StripeGeometry,
    pub scratch: Scratch,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        stripe: &'a mut Stripe,
        eboard: &'a mut ErrorBoard,
        kernel: &'a dyn XorKernel,
        config: &'a EngineConfig,
        request: &'a EvalRequest,
    ) -> Self {
        let geometry = stripe.geometry().clone();
        let scratch = Scratch::new(request);
        Self {
            stripe,
            eboard,
            kernel,
            config,
            request,
            geometry,
            scratch,
        }
    }

    pub fn data_mask(&self) -> PositionMask {
        self.geometry.data_mask()
    }

    pub fn parity_mask(&self) -> PositionMask {
        self.geometry.parity_mask()
    }

    pub fn row_mask(&self) -> PositionMask {
        PositionMask::bit(self.geometry.row_parity())
    }

    pub fn diag_mask(&self) -> PositionMask {
        PositionMask::bit(self.geometry.diag_parity())
    }

    pub fn fatal_data(&self) -> PositionMask {
        self.scratch.fatal_key & self.data_mask()
    }

    pub fn fatal_parity(&self) -> PositionMask {
        self.scratch.fatal_key & self.parity_mask()
    }

    /// Live positions among `mask`
    pub fn live(&self, mask: PositionMask) -> PositionMask {
        mask.without(self.scratch.fatal_key)
    }

    pub fn add_fatal(&mut self, mask: PositionMask) {
        if !self.scratch.fatal_key.includes(mask) {
            trace!("fatal {} += {}", self.scratch.fatal_key, mask);
        }
        self.scratch.fatal_key |= mask;
    }

    pub fn remove_fatal(&mut self, mask: PositionMask) {
        self.scratch.fatal_key = self.scratch.fatal_key.without(mask);
    }

    /// Logical column of a data position
    pub fn column_of(&self, pos: usize) -> Result<usize> {
        self.geometry
            .logical_column(pos)
            .ok_or_else(|| Error::precondition(format!("position {pos} is not a data column")))
    }

    /// Re-derive the rebuild positions from the fatal set
    pub fn reset_rebuild_positions(&mut self) -> Result<()> {
        let fatal = self.scratch.fatal_key;
        if !self.geometry.full_mask().includes(fatal) {
            return Err(Error::precondition(format!(
                "fatal set {fatal} exceeds stripe width {}",
                self.geometry.width()
            )));
        }
        let order = self
            .geometry
            .data_positions()
            .chain([self.geometry.row_parity(), self.geometry.diag_parity()]);
        let mut found = 0;
        let mut rebuild_pos = [None, None];
        for pos in order.filter(|&pos| fatal.contains(pos)) {
            if let Some(slot) = rebuild_pos.get_mut(found) {
                *slot = Some(pos);
            }
            found += 1;
        }
        if found != self.scratch.fatal_count() {
            return Err(Error::precondition(format!(
                "fatal set {fatal} counts {} positions, found {found}",
                self.scratch.fatal_count()
            )));
        }
        self.scratch.rebuild_pos = rebuild_pos;
        Ok(())
    }

    /// Pick the state for the current fatal set
    ///
    /// More than two fatal positions cannot be repaired; the fatal data is
    /// invalidated and the evaluation finishes.
    pub fn classify_state(&mut self) -> RepairState {
        let data = self.fatal_data().count();
        let parity = self.fatal_parity().count();
        let state = match (data, parity) {
            (0, 0) => RepairState::Verify,
            (1, 0 | 1) => RepairState::Reconstruct1,
            (2, 0) => RepairState::Reconstruct2,
            (0, _) => RepairState::ReconstructParity,
            _ => {
                self.eboard
                    .flag_uncorrectable(ErrorKind::Crc, 8, self.fatal_data());
                self.invalidate_and_rebuild_parity();
                RepairState::Done
            }
        };
        if state != self.scratch.state {
            debug!(
                "lba {:#x}: {} -> {} (fatal {})",
                self.stripe.lba(),
                self.scratch.state,
                state,
                self.scratch.fatal_key
            );
        }
        self.scratch.state = state;
        state
    }

    /// Clear the correctable checksum bit on positions the caller asked to
    /// rebuild; an erasure that was rebuilt is not an error
    pub fn clear_initial_rebuild_crc(&mut self, mask: PositionMask) {
        let cleared = mask & self.scratch.initial_rebuild;
        self.eboard.correctable.crc = self.eboard.correctable.crc.without(cleared);
    }

    /// Mark positions as rebuilt: modified, no longer fatal, errors corrected
    pub fn mark_rebuilt(&mut self, mask: PositionMask) {
        self.eboard.m_bitmap |= mask;
        self.remove_fatal(mask);
        self.eboard.correct_all_one_pos(mask);
        self.clear_initial_rebuild_crc(mask);
    }
}
