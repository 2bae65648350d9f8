//! Configuration types
//!
//! Loaded from TOML by the binaries; every section falls back to its
//! `Default` when absent.

use crate::error::{Error, Result};
use crate::types::{KernelKind, MAX_WIDTH, MIN_WIDTH};
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repair engine configuration
    pub engine: EngineConfig,
    /// Scrub tool configuration
    pub scrub: ScrubConfig,
}

impl Config {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.scrub.validate()
    }
}

/// Repair engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// XOR/checksum kernel
    pub kernel: KernelKind,
    /// Upper bound on state machine passes per evaluation
    pub max_passes: u8,
    /// Try to pin a coherency error on a single data column before
    /// falling back to re-deriving both parities
    pub exact_localization: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kernel: KernelKind::Auto,
            max_passes: 3,
            exact_localization: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(Error::Config("engine.max_passes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Scrub tool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubConfig {
    /// Stripe width including both parities
    pub width: usize,
    /// Number of stripes to generate
    pub stripes: usize,
    /// RNG seed for stripe contents and fault injection
    pub seed: u64,
    /// LBA of the first stripe
    pub lba: u64,
    /// RAID group offset mixed into LBA stamps
    pub raid_group_offset: u64,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            width: 6,
            stripes: 64,
            seed: 0x5EED,
            lba: 0,
            raid_group_offset: 0,
        }
    }
}

impl ScrubConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&self.width) {
            return Err(Error::InvalidWidth {
                width: self.width,
                min: MIN_WIDTH,
                max: MAX_WIDTH,
            });
        }
        Ok(())
    }
}
