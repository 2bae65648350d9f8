//! Sector checksum primitives
//!
//! The sector checksum is a 16-bit "cooked" fold of the raw checksum, which
//! is the XOR of all 128 data words. Cooking is affine over XOR, so the
//! checksum of an XOR of sectors can be derived from their checksums:
//! `cook(a) ^ cook(b) == cook(a ^ b) ^ ZEROED_SECTOR_CHECKSUM`.

/// Seed mixed into the raw checksum before folding
pub const CHECKSUM_SEED: u32 = 0xAF76;

/// Checksum of an all-zero sector (`cook(0)`)
pub const ZEROED_SECTOR_CHECKSUM: u16 = 0x5EED;

/// Fold a raw 32-bit checksum into the stored 16-bit form
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn cook(raw: u32) -> u16 {
    let r = (raw ^ CHECKSUM_SEED).rotate_left(1);
    ((r >> 16) ^ r) as u16
}

/// Raw checksum of a run of data words
#[must_use]
pub fn raw_checksum(words: &[u32]) -> u32 {
    words.iter().fold(0, |acc, word| acc ^ word)
}

/// Cooked checksum of a run of data words
#[must_use]
pub fn compute(words: &[u32]) -> u16 {
    cook(raw_checksum(words))
}

/// Streaming checksum calculator
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumCalculator {
    raw: u32,
}

impl ChecksumCalculator {
    /// Create a new calculator
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    /// Fold more data words in
    pub fn update(&mut self, words: &[u32]) {
        self.raw ^= raw_checksum(words);
    }

    /// Fold an already computed raw checksum in
    pub const fn update_raw(&mut self, raw: u32) {
        self.raw ^= raw;
    }

    /// Raw checksum so far
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Cooked checksum of everything folded in
    #[must_use]
    pub const fn finalize(&self) -> u16 {
        cook(self.raw)
    }
}
