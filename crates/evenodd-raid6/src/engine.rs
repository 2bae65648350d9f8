//! Repair engine
//!
//! [`Raid6Engine`] owns the XOR/checksum kernel, resolved once at
//! construction, and the engine configuration. Every call to
//! [`Raid6Engine::evaluate`] runs the repair state machine over one stripe:
//!
//! ```text
//! zeroed-strip check
//! loop (max_passes):
//!     classify fatal set -> VERIFY | RECONSTRUCT_1 | RECONSTRUCT_2 | RECONSTRUCT_P
//!     check and fold live data, then live parity
//!     fatal set unchanged -> finish the state
//! ```
//!
//! A pass that turns up new fatal positions goes round again with the new
//! set. The engine never retries reads; that is left to the caller, guided
//! by the error board.

use crate::backend::{KernelFactory, XorKernel};
use crate::eboard::{ErrorBoard, ErrorKind};
use crate::parity::compute_parity;
use crate::scratch::{EvalContext, RepairState};
use crate::stamps::ParityStamps;
use crate::stripe::{EvalRequest, RepairOutcome, Stripe};
use evenodd_common::{EngineConfig, Error, PositionMask, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// EVENODD RAID-6 repair engine
#[derive(Clone)]
pub struct Raid6Engine {
    kernel: Arc<dyn XorKernel>,
    config: EngineConfig,
}

impl fmt::Debug for Raid6Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raid6Engine")
            .field("kernel", &self.kernel.capabilities().name)
            .field("config", &self.config)
            .finish()
    }
}

impl Raid6Engine {
    /// Create an engine, resolving the configured kernel
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let kernel = KernelFactory::create(config.kernel)?;
        debug!("raid6 engine using {} kernel", kernel.capabilities().name);
        Ok(Self { kernel, config })
    }

    /// Create an engine around an explicit kernel
    pub fn with_kernel(kernel: Arc<dyn XorKernel>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { kernel, config })
    }

    #[must_use]
    pub fn kernel(&self) -> &dyn XorKernel {
        &*self.kernel
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute both parity columns of `stripe` from its data columns
    ///
    /// Payload, checksum, parity of checksums and stamps are all written.
    pub fn encode(&self, stripe: &mut Stripe) {
        let computed = compute_parity(&*self.kernel, stripe);
        let stamps = ParityStamps::derive(stripe, PositionMask::EMPTY);
        let (row, diag) = {
            let geometry = stripe.geometry();
            (geometry.row_parity(), geometry.diag_parity())
        };
        for (pos, fresh) in [(row, computed.row), (diag, computed.diag)] {
            let sector = stripe.sector_mut(pos);
            *sector = fresh;
            stamps.apply(sector);
        }
    }

    /// Check `stripe` and repair what can be repaired
    ///
    /// Decisions rest on this evaluation's findings alone. They are collected
    /// on a board of their own and then added to `eboard`, so a reused board
    /// accumulates across stripes without steering later evaluations.
    /// Repaired and invalidated sectors are written into `stripe` and named
    /// in the outcome. `Err` is returned only for a broken caller contract.
    pub fn evaluate(
        &self,
        stripe: &mut Stripe,
        request: &EvalRequest,
        eboard: &mut ErrorBoard,
    ) -> Result<RepairOutcome> {
        validate_request(stripe, request)?;
        let mut found = ErrorBoard {
            hard_media_err: request.media_errors,
            retry_err: request.retry_errors,
            no_data_err: request.no_data,
            ..ErrorBoard::default()
        };

        let outcome = {
            let mut ctx =
                EvalContext::new(stripe, &mut found, &*self.kernel, &self.config, request);
            ctx.run()?;
            ctx.finalize()
        };
        eboard.merge(found);
        Ok(outcome)
    }
}

fn validate_request(stripe: &Stripe, request: &EvalRequest) -> Result<()> {
    let geometry = stripe.geometry();
    for pos in request.rebuild.iter().flatten() {
        geometry.check_position(*pos)?;
    }
    if let [Some(first), Some(second)] = request.rebuild {
        if first == second {
            return Err(Error::precondition(format!(
                "rebuild position {first} given twice"
            )));
        }
    }
    let full = geometry.full_mask();
    for (name, mask) in [
        ("media", request.media_errors),
        ("retry", request.retry_errors),
        ("no-data", request.no_data),
    ] {
        if !full.includes(mask) {
            return Err(Error::precondition(format!(
                "{name} errors {mask} outside stripe width {}",
                geometry.width()
            )));
        }
    }
    Ok(())
}

impl EvalContext<'_> {
    /// Drive the state machine to completion
    pub(crate) fn run(&mut self) -> Result<()> {
        if self.handle_zeroed_strip() {
            return Ok(());
        }
        self.reset_rebuild_positions()?;

        for pass in 0..self.config.max_passes {
            if self.classify_state() == RepairState::Done {
                return Ok(());
            }
            let fatal = self.scratch.fatal_key;
            self.scratch.syndromes.clear();
            self.eval_data_sectors();
            self.eval_parity_sectors();

            if self.scratch.fatal_key == fatal {
                match self.scratch.state {
                    RepairState::Verify => self.finish_verify(),
                    RepairState::Reconstruct1 => self.finish_reconstruct_1()?,
                    RepairState::Reconstruct2 => self.finish_reconstruct_2()?,
                    RepairState::ReconstructParity => self.finish_reconstruct_parity()?,
                    RepairState::NotSet | RepairState::Done => {}
                }
                if self.scratch.state == RepairState::Done {
                    return Ok(());
                }
            } else {
                debug!(
                    "lba {:#x}: pass {pass} found new fatal positions {}",
                    self.stripe.lba(),
                    self.scratch.fatal_key.without(fatal)
                );
            }
            self.reset_rebuild_positions()?;
        }

        warn!(
            "lba {:#x}: no resolution after {} passes (fatal {})",
            self.stripe.lba(),
            self.config.max_passes,
            self.scratch.fatal_key
        );
        self.eboard
            .flag_uncorrectable(ErrorKind::Crc, 7, self.fatal_data());
        self.invalidate_and_rebuild_parity();
        Ok(())
    }

    /// Settle the error board and pick the outcome
    pub(crate) fn finalize(&mut self) -> RepairOutcome {
        let data = self.data_mask();
        let deliberate = self.eboard.deliberately_invalidated() & data;
        self.eboard.flag_uncorrectable(
            ErrorKind::Crc,
            9,
            deliberate.without(self.eboard.uncorrectable.crc),
        );

        // a retried read gets a second chance instead of a write-back
        let retry = self.eboard.retry_err;
        self.eboard.m_bitmap = self.eboard.m_bitmap.without(retry);
        self.eboard.correctable.crc = self.eboard.correctable.crc.without(retry);

        self.eboard.determine_media_errors(self.geometry.full_mask());
        self.eboard.convert_coherency_errors(self.parity_mask());

        let invalid = (self.scratch.fatal_key
            | self.eboard.crc_invalid
            | self.eboard.crc_raid
            | self.eboard.corrupt_crc
            | self.scratch.invalidated)
            & data;
        self.eboard.invalid_bitmask |= invalid;

        let modified = self.eboard.m_bitmap;
        if !invalid.is_empty() {
            RepairOutcome::NeedsInvalidate {
                positions: invalid,
                modified,
            }
        } else if modified.is_empty() && !self.scratch.zeroed {
            RepairOutcome::Verified
        } else {
            RepairOutcome::Repaired { modified }
        }
    }
}
