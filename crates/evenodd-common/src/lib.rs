//! EVENODD Common - Shared types for the RAID-6 repair engine
//!
//! This crate holds everything the engine and its tooling agree on:
//! - The 520-byte sector wire format and its metadata fields
//! - The cooked 16-bit sector checksum and the invalidated-sector pattern
//! - Time-stamp, write-stamp and LBA-stamp sentinels
//! - Stripe geometry and position bitmaps
//! - Configuration and the shared error type

pub mod checksum;
pub mod config;
pub mod error;
pub mod sector;
pub mod stamps;
pub mod types;

pub use checksum::{ChecksumCalculator, ZEROED_SECTOR_CHECKSUM};
pub use config::{Config, EngineConfig, ScrubConfig};
pub use error::{Error, Result};
pub use sector::{ChecksumFault, InvalidReason, InvalidatedBy, Sector};
pub use types::{KernelKind, PositionMask, StripeGeometry};
