//! EVENODD RAID-6 - Double-fault detection and repair
//!
//! This crate checks one stripe at a time and repairs what EVENODD parity
//! allows:
//! - Coherency verification of the row and diagonal syndromes
//! - Rebuild of one data column, with one parity also missing
//! - Rebuild of two data columns
//! - Rebuild of one or both parity columns
//! - Write-ordering stamp reconciliation for torn writes
//! - Recognition of never-written stripes
//!
//! Every column also carries a 16-bit checksum; the checksums are protected
//! by their own EVENODD parity (the parity of checksums, stored in the parity
//! columns' `lba_stamp`), so a rebuilt column can be checked against a
//! rebuilt checksum.
//!
//! # Kernels
//!
//! - **portable** (always built): 32-bit words, the reference
//! - **wide** (feature `wide-kernel`, default): 64-bit lanes
//!
//! # Example
//!
//! ```
//! use evenodd_raid6::prelude::*;
//! use evenodd_common::{EngineConfig, Sector, StripeGeometry};
//!
//! let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
//! let geometry = StripeGeometry::new(6, 4, 5).unwrap();
//! let mut stripe = Stripe::new(geometry, 0x1000);
//! stripe.write_full(&[[7; 128], [9; 128], [11; 128], [13; 128]], 0x0100).unwrap();
//! engine.encode(&mut stripe);
//!
//! let lost = stripe.sector(1).clone();
//! *stripe.sector_mut(1) = Sector::zeroed();
//! let mut eboard = ErrorBoard::new();
//! let outcome = engine
//!     .evaluate(&mut stripe, &EvalRequest::rebuild(1), &mut eboard)
//!     .unwrap();
//! assert!(!outcome.is_uncorrectable());
//! assert_eq!(*stripe.sector(1), lost);
//! ```

pub mod backend;
pub mod eboard;
pub mod engine;
pub mod mangle;
pub mod parity;
pub mod poc;
pub mod recover;
pub mod stripe;
pub mod symbol;
pub mod syndrome;
pub mod verify;

mod reconstruct1;
mod reconstruct2;
mod scratch;
mod sector_eval;
mod stamps;
mod zeroed;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod scenarios;

pub use backend::{KernelCapabilities, KernelFactory, PortableKernel, XorKernel};
pub use eboard::{ErrorBoard, ErrorKind, ErrorSet, ErrorTrace, Severity};
pub use engine::Raid6Engine;
pub use parity::{ComputedParity, compute_parity};
pub use poc::ParityOfChecksums;
pub use scratch::RepairState;
pub use stamps::ParityStamps;
pub use stripe::{EvalRequest, RepairOutcome, Stripe};
pub use syndrome::Syndromes;
pub use verify::localize_column;

#[cfg(feature = "wide-kernel")]
pub use backend::WideKernel;

/// Prelude for common imports
pub mod prelude {
    pub use super::{ErrorBoard, EvalRequest, Raid6Engine, RepairOutcome, Stripe, XorKernel};
}
