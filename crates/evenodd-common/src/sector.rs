//! Sector format
//!
//! A sector is 128 data words followed by four 16-bit metadata fields.
//!
//! # Wire Layout
//!
//! ```text
//! offset  size  field
//!      0   512  data words (little-endian u32)
//!    512     2  checksum
//!    514     2  lba_stamp (data: placement stamp, parity: parity of checksums)
//!    516     2  time_stamp
//!    518     2  write_stamp
//! ```

use crate::checksum::{self, ZEROED_SECTOR_CHECKSUM};
use crate::error::{Error, Result};
use crate::stamps::INVALID_TSTAMP;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Data words per sector
pub const SECTOR_WORDS: usize = 128;

/// Data bytes per sector
pub const SECTOR_DATA_BYTES: usize = SECTOR_WORDS * 4;

/// Encoded sector size including metadata
pub const SECTOR_WIRE_BYTES: usize = SECTOR_DATA_BYTES + 8;

/// First data word of a deliberately invalidated sector
pub const INVALIDATED_MAGIC: u32 = 0xBAD0_5EC7;

/// Checksum bits flipped on an invalidated sector
const INVALIDATED_CRC_MASK: u16 = 0xFFFF;

/// Why a sector was deliberately invalidated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// Data was lost (e.g. reconstruction impossible)
    DataLost,
    /// Invalidated by a verify pass
    Verify,
    /// Checksum corrupted on request
    CorruptCrc,
    /// Data corrupted on request
    CorruptData,
}

impl InvalidReason {
    const fn code(self) -> u32 {
        match self {
            Self::DataLost => 1,
            Self::Verify => 2,
            Self::CorruptCrc => 3,
            Self::CorruptData => 4,
        }
    }

    const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::DataLost),
            2 => Some(Self::Verify),
            3 => Some(Self::CorruptCrc),
            4 => Some(Self::CorruptData),
            _ => None,
        }
    }
}

/// Who invalidated a sector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidatedBy {
    Raid,
    Client,
}

impl InvalidatedBy {
    const fn code(self) -> u32 {
        match self {
            Self::Raid => 1,
            Self::Client => 2,
        }
    }

    const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Raid),
            2 => Some(Self::Client),
            _ => None,
        }
    }
}

/// Classification of a sector whose checksum does not match its data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumFault {
    /// Carries the invalidated-sector pattern
    Invalidated {
        reason: InvalidReason,
        by: InvalidatedBy,
    },
    /// Exactly one checksum bit differs
    SingleBit,
    /// Several checksum bits differ
    MultiBit,
}

impl ChecksumFault {
    /// Invalidated on purpose; reported as a checksum error, never as coherency
    #[must_use]
    pub const fn is_deliberate(&self) -> bool {
        matches!(
            self,
            Self::Invalidated {
                reason: InvalidReason::DataLost | InvalidReason::Verify | InvalidReason::CorruptCrc,
                ..
            }
        )
    }
}

/// One sector: data words plus metadata
#[derive(Clone, PartialEq, Eq)]
pub struct Sector {
    pub data: [u32; SECTOR_WORDS],
    pub crc: u16,
    pub lba_stamp: u16,
    pub time_stamp: u16,
    pub write_stamp: u16,
}

impl Sector {
    /// Canonical never-written sector
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            data: [0; SECTOR_WORDS],
            crc: ZEROED_SECTOR_CHECKSUM,
            lba_stamp: 0,
            time_stamp: INVALID_TSTAMP,
            write_stamp: 0,
        }
    }

    /// Sector holding `data` with a matching checksum and unset stamps
    #[must_use]
    pub fn with_data(data: [u32; SECTOR_WORDS]) -> Self {
        let crc = checksum::compute(&data);
        Self {
            data,
            crc,
            ..Self::zeroed()
        }
    }

    /// Raw checksum of the data words
    #[must_use]
    pub fn raw_checksum(&self) -> u32 {
        checksum::raw_checksum(&self.data)
    }

    /// Checksum the data words should carry
    #[must_use]
    pub fn computed_checksum(&self) -> u16 {
        checksum::compute(&self.data)
    }

    #[must_use]
    pub fn checksum_ok(&self) -> bool {
        self.crc == self.computed_checksum()
    }

    /// Recompute the stored checksum from the data words
    pub fn seal(&mut self) {
        self.crc = self.computed_checksum();
    }

    #[must_use]
    pub fn data_is_zero(&self) -> bool {
        self.data.iter().all(|&word| word == 0)
    }

    /// Matches the canonical never-written pattern exactly
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        *self == Self::zeroed()
    }

    /// Overwrite with the invalidated-sector pattern
    ///
    /// The checksum is left deliberately wrong so the sector never verifies.
    /// Stamps are untouched.
    #[allow(clippy::cast_possible_truncation)]
    pub fn invalidate(&mut self, reason: InvalidReason, by: InvalidatedBy, lba: u64) {
        self.data = [0; SECTOR_WORDS];
        self.data[0] = INVALIDATED_MAGIC;
        self.data[1] = reason.code();
        self.data[2] = by.code();
        self.data[3] = lba as u32;
        self.data[4] = (lba >> 32) as u32;
        self.crc = self.computed_checksum() ^ INVALIDATED_CRC_MASK;
    }

    /// Reason and originator if this sector carries the invalidated pattern
    #[must_use]
    pub fn invalidation(&self) -> Option<(InvalidReason, InvalidatedBy)> {
        if self.data[0] != INVALIDATED_MAGIC
            || self.crc != self.computed_checksum() ^ INVALIDATED_CRC_MASK
        {
            return None;
        }
        Some((
            InvalidReason::from_code(self.data[1])?,
            InvalidatedBy::from_code(self.data[2])?,
        ))
    }

    /// Classify a checksum failure; `None` if the checksum is good
    #[must_use]
    pub fn checksum_fault(&self) -> Option<ChecksumFault> {
        let computed = self.computed_checksum();
        if self.crc == computed {
            return None;
        }
        if let Some((reason, by)) = self.invalidation() {
            return Some(ChecksumFault::Invalidated { reason, by });
        }
        if (self.crc ^ computed).count_ones() == 1 {
            Some(ChecksumFault::SingleBit)
        } else {
            Some(ChecksumFault::MultiBit)
        }
    }

    /// Append the wire encoding to `buf`
    pub fn encode(&self, buf: &mut impl BufMut) {
        for &word in &self.data {
            buf.put_u32_le(word);
        }
        buf.put_u16_le(self.crc);
        buf.put_u16_le(self.lba_stamp);
        buf.put_u16_le(self.time_stamp);
        buf.put_u16_le(self.write_stamp);
    }

    /// Serialize to the wire layout
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SECTOR_WIRE_BYTES);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one sector from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < SECTOR_WIRE_BYTES {
            return Err(Error::SectorSize {
                expected: SECTOR_WIRE_BYTES,
                actual: buf.remaining(),
            });
        }
        let mut data = [0u32; SECTOR_WORDS];
        for word in &mut data {
            *word = buf.get_u32_le();
        }
        Ok(Self {
            data,
            crc: buf.get_u16_le(),
            lba_stamp: buf.get_u16_le(),
            time_stamp: buf.get_u16_le(),
            write_stamp: buf.get_u16_le(),
        })
    }

    /// Parse exactly one encoded sector
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECTOR_WIRE_BYTES {
            return Err(Error::SectorSize {
                expected: SECTOR_WIRE_BYTES,
                actual: bytes.len(),
            });
        }
        let mut buf = bytes;
        Self::decode(&mut buf)
    }
}

impl Default for Sector {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sector")
            .field("crc", &format_args!("{:#06x}", self.crc))
            .field("lba_stamp", &format_args!("{:#06x}", self.lba_stamp))
            .field("time_stamp", &format_args!("{:#06x}", self.time_stamp))
            .field("write_stamp", &format_args!("{:#06x}", self.write_stamp))
            .field("raw", &format_args!("{:#010x}", self.raw_checksum()))
            .finish_non_exhaustive()
    }
}
