//! Write-ordering stamps
//!
//! Every sector carries a time stamp and a write stamp. A full-stripe write
//! gives every data column the same time stamp and leaves the write stamp
//! at zero; a partial write leaves the time stamp invalid and sets the write
//! stamp to the column's own position bit. Parity columns summarize both:
//! the first real time stamp (flagged with [`ALL_TSTAMPS`] when every data
//! column carries it) and the OR of all data write stamps.
//!
//! On data columns the LBA stamp validates placement; on parity columns the
//! same field holds the parity of checksums.

/// Time stamp of a sector that was never written or was invalidated
pub const INVALID_TSTAMP: u16 = 0x7FFF;

/// Legacy "initial" marker; shares its value with [`INVALID_TSTAMP`]
pub const INITIAL_TSTAMP: u16 = INVALID_TSTAMP;

/// Time stamp parity carries when no data column holds a real time stamp
pub const R6_INVALID_TSTAMP: u16 = 0x7FFE;

/// Top bit: every live member of the write carried this time stamp
pub const ALL_TSTAMPS: u16 = 0x8000;

/// Replacement for a generated time stamp that collides with a sentinel
pub const SUBSTITUTE_TSTAMP: u16 = 0x1234;

/// Check whether the "all members participated" flag is set
#[must_use]
pub const fn has_all_flag(time_stamp: u16) -> bool {
    time_stamp & ALL_TSTAMPS != 0
}

/// Strip the "all members participated" flag
#[must_use]
pub const fn without_all_flag(time_stamp: u16) -> u16 {
    time_stamp & !ALL_TSTAMPS
}

/// Check whether a time stamp (flag ignored) is one of the reserved sentinels
#[must_use]
pub const fn is_sentinel(time_stamp: u16) -> bool {
    let base = without_all_flag(time_stamp);
    base == INVALID_TSTAMP || base == INITIAL_TSTAMP || base == R6_INVALID_TSTAMP
}

/// Derive a time stamp from a monotonically increasing write counter
///
/// The result never carries the flag bit and never equals a sentinel.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn time_stamp_from(counter: u64) -> u16 {
    let ts = (counter & 0x7FFF) as u16;
    if is_sentinel(ts) { SUBSTITUTE_TSTAMP } else { ts }
}

/// LBA stamp for a data sector: the address folded to 16 bits
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn generate_lba_stamp(lba: u64, offset: u64) -> u16 {
    let x = lba.wrapping_add(offset);
    (x ^ (x >> 16) ^ (x >> 32) ^ (x >> 48)) as u16
}

/// Check a data sector's LBA stamp; zero means "not stamped" and is accepted
#[must_use]
pub const fn is_valid_lba_stamp(stamp: u16, lba: u64, offset: u64) -> bool {
    stamp == 0 || stamp == generate_lba_stamp(lba, offset)
}
