//! Error board
//!
//! Caller-owned record of everything one evaluation found, one bit per
//! stripe position per error class. The engine only ever adds to it (or
//! moves a bit from the uncorrectable to the correctable side once the
//! position has been repaired); it never resets it.
//!
//! Every condition is also appended to [`ErrorBoard::trace`] with a stable
//! diagnostic code and emitted as a `tracing` event.

use evenodd_common::{ChecksumFault, InvalidReason, PositionMask, Sector};
use std::fmt;
use tracing::{debug, warn};

/// Error classes tracked on both sides of the board
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Checksum
    Crc,
    /// Row/diagonal coherency
    Coh,
    /// Time stamp
    Ts,
    /// Write stamp
    Ws,
    /// Shed stamp
    Ss,
    /// Parity-of-checksums coherency, parity known
    PocCoh,
    /// Parity-of-checksums coherency, parity not known
    NPocCoh,
    /// Coherency that fits no known pattern
    CohUnk,
}

impl ErrorKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Crc => "CRC",
            Self::Coh => "COH",
            Self::Ts => "TS",
            Self::Ws => "WS",
            Self::Ss => "SS",
            Self::PocCoh => "POC",
            Self::NPocCoh => "NPOC",
            Self::CohUnk => "COH_UNK",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Correctable or not
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Correctable,
    Uncorrectable,
}

/// One recorded condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorTrace {
    pub severity: Severity,
    pub kind: ErrorKind,
    /// Stable diagnostic code, unique per kind
    pub code: u16,
    pub bitmap: PositionMask,
}

impl fmt::Display for ErrorTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.severity {
            Severity::Correctable => "c",
            Severity::Uncorrectable => "u",
        };
        write!(f, "{side}_{}-{} {}", self.kind, self.code, self.bitmap)
    }
}

/// Bitmaps for one side of the board
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorSet {
    pub crc: PositionMask,
    pub coh: PositionMask,
    pub ts: PositionMask,
    pub ws: PositionMask,
    pub ss: PositionMask,
    pub poc_coh: PositionMask,
    pub n_poc_coh: PositionMask,
    pub coh_unk: PositionMask,
}

impl ErrorSet {
    const KINDS: [ErrorKind; 8] = [
        ErrorKind::Crc,
        ErrorKind::Coh,
        ErrorKind::Ts,
        ErrorKind::Ws,
        ErrorKind::Ss,
        ErrorKind::PocCoh,
        ErrorKind::NPocCoh,
        ErrorKind::CohUnk,
    ];

    #[must_use]
    pub const fn get(&self, kind: ErrorKind) -> PositionMask {
        match kind {
            ErrorKind::Crc => self.crc,
            ErrorKind::Coh => self.coh,
            ErrorKind::Ts => self.ts,
            ErrorKind::Ws => self.ws,
            ErrorKind::Ss => self.ss,
            ErrorKind::PocCoh => self.poc_coh,
            ErrorKind::NPocCoh => self.n_poc_coh,
            ErrorKind::CohUnk => self.coh_unk,
        }
    }

    pub const fn get_mut(&mut self, kind: ErrorKind) -> &mut PositionMask {
        match kind {
            ErrorKind::Crc => &mut self.crc,
            ErrorKind::Coh => &mut self.coh,
            ErrorKind::Ts => &mut self.ts,
            ErrorKind::Ws => &mut self.ws,
            ErrorKind::Ss => &mut self.ss,
            ErrorKind::PocCoh => &mut self.poc_coh,
            ErrorKind::NPocCoh => &mut self.n_poc_coh,
            ErrorKind::CohUnk => &mut self.coh_unk,
        }
    }

    /// Every position with any error
    #[must_use]
    pub fn union(&self) -> PositionMask {
        Self::KINDS
            .iter()
            .fold(PositionMask::EMPTY, |acc, &kind| acc | self.get(kind))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.union().is_empty()
    }

    /// Add every bit of `other`
    pub fn merge(&mut self, other: &Self) {
        for kind in Self::KINDS {
            *self.get_mut(kind) |= other.get(kind);
        }
    }
}

/// Caller-owned error classification board
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorBoard {
    pub correctable: ErrorSet,
    pub uncorrectable: ErrorSet,

    // Checksum sub-classes
    /// Invalidated because data was lost
    pub crc_invalid: PositionMask,
    /// Invalidated by a RAID verify
    pub crc_raid: PositionMask,
    /// Checksum corrupted on request
    pub corrupt_crc: PositionMask,
    /// Data corrupted on request
    pub corrupt_data: PositionMask,
    /// One checksum bit off
    pub crc_single: PositionMask,
    /// Several checksum bits off
    pub crc_multi: PositionMask,
    /// Data sector at the wrong address
    pub crc_lba_stamp: PositionMask,

    // Inputs set by the caller
    pub hard_media_err: PositionMask,
    pub retry_err: PositionMask,
    pub no_data_err: PositionMask,

    // Outputs
    /// Positions whose buffer the engine rewrote
    pub m_bitmap: PositionMask,
    /// Positions with media errors
    pub media_err: PositionMask,
    /// Data positions the caller must treat as lost
    pub invalid_bitmask: PositionMask,

    pub trace: Vec<ErrorTrace>,
}

impl ErrorBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a condition
    pub fn record(&mut self, severity: Severity, kind: ErrorKind, code: u16, bitmap: PositionMask) {
        if bitmap.is_empty() {
            return;
        }
        let entry = ErrorTrace {
            severity,
            kind,
            code,
            bitmap,
        };
        match severity {
            Severity::Correctable => {
                *self.correctable.get_mut(kind) |= bitmap;
                debug!("error board: {}", entry);
            }
            Severity::Uncorrectable => {
                *self.uncorrectable.get_mut(kind) |= bitmap;
                warn!("error board: {}", entry);
            }
        }
        self.trace.push(entry);
    }

    /// Record a correctable condition
    pub fn flag_correctable(&mut self, kind: ErrorKind, code: u16, bitmap: PositionMask) {
        self.record(Severity::Correctable, kind, code, bitmap);
    }

    /// Record an uncorrectable condition
    pub fn flag_uncorrectable(&mut self, kind: ErrorKind, code: u16, bitmap: PositionMask) {
        self.record(Severity::Uncorrectable, kind, code, bitmap);
    }

    /// Positions invalidated on purpose (reported as checksum, never coherency)
    #[must_use]
    pub fn deliberately_invalidated(&self) -> PositionMask {
        self.crc_invalid | self.crc_raid | self.corrupt_crc
    }

    /// Positions with any uncorrectable error
    #[must_use]
    pub fn uncorrectable_mask(&self) -> PositionMask {
        self.uncorrectable.union()
    }

    /// Record the sub-class of a checksum failure on `key`
    ///
    /// Returns `true` when the sector was deliberately invalidated.
    pub fn classify_checksum_error(&mut self, sector: &Sector, key: PositionMask) -> bool {
        match sector.checksum_fault() {
            None => false,
            Some(ChecksumFault::Invalidated { reason, .. }) => {
                match reason {
                    InvalidReason::DataLost => self.crc_invalid |= key,
                    InvalidReason::Verify => self.crc_raid |= key,
                    InvalidReason::CorruptCrc => self.corrupt_crc |= key,
                    InvalidReason::CorruptData => self.corrupt_data |= key,
                }
                !matches!(reason, InvalidReason::CorruptData)
            }
            Some(ChecksumFault::SingleBit) => {
                self.crc_single |= key;
                false
            }
            Some(ChecksumFault::MultiBit) => {
                self.crc_multi |= key;
                false
            }
        }
    }

    /// Take back a correctable condition on `mask`; the trace keeps it
    pub fn withdraw_correctable(&mut self, kind: ErrorKind, mask: PositionMask) {
        let withdrawn = self.correctable.get(kind) & mask;
        if withdrawn.is_empty() {
            return;
        }
        *self.correctable.get_mut(kind) = self.correctable.get(kind).without(withdrawn);
        debug!("error board: withdrew c_{} {}", kind, withdrawn);
    }

    /// Add the findings of another evaluation to this board
    pub fn merge(&mut self, other: Self) {
        self.correctable.merge(&other.correctable);
        self.uncorrectable.merge(&other.uncorrectable);
        self.crc_invalid |= other.crc_invalid;
        self.crc_raid |= other.crc_raid;
        self.corrupt_crc |= other.corrupt_crc;
        self.corrupt_data |= other.corrupt_data;
        self.crc_single |= other.crc_single;
        self.crc_multi |= other.crc_multi;
        self.crc_lba_stamp |= other.crc_lba_stamp;
        self.hard_media_err |= other.hard_media_err;
        self.retry_err |= other.retry_err;
        self.no_data_err |= other.no_data_err;
        self.m_bitmap |= other.m_bitmap;
        self.media_err |= other.media_err;
        self.invalid_bitmask |= other.invalid_bitmask;
        self.trace.extend(other.trace);
    }

    /// Forget the checksum sub-class of positions in `mask`
    pub fn clear_checksum_class(&mut self, mask: PositionMask) {
        for bitmap in [
            &mut self.crc_invalid,
            &mut self.crc_raid,
            &mut self.corrupt_crc,
            &mut self.corrupt_data,
            &mut self.crc_single,
            &mut self.crc_multi,
        ] {
            *bitmap = bitmap.without(mask);
        }
    }

    fn promote(&mut self, kind: ErrorKind, mask: PositionMask) {
        let target = if kind == ErrorKind::CohUnk {
            ErrorKind::Coh
        } else {
            kind
        };
        let moved = self.uncorrectable.get(kind) & mask;
        *self.uncorrectable.get_mut(kind) = self.uncorrectable.get(kind).without(moved);
        *self.correctable.get_mut(target) |= moved;
    }

    const BASIC: [ErrorKind; 6] = [
        ErrorKind::Crc,
        ErrorKind::Coh,
        ErrorKind::Ts,
        ErrorKind::Ws,
        ErrorKind::Ss,
        ErrorKind::CohUnk,
    ];

    /// Everything uncorrectable becomes correctable (POC classes excepted)
    pub fn correct_all(&mut self) {
        for kind in Self::BASIC {
            self.promote(kind, PositionMask::from_bits(u16::MAX));
        }
    }

    /// [`Self::correct_all`] plus the POC classes
    pub fn raid6_correct_all(&mut self) {
        self.correct_all();
        self.promote(ErrorKind::PocCoh, PositionMask::from_bits(u16::MAX));
        self.promote(ErrorKind::NPocCoh, PositionMask::from_bits(u16::MAX));
    }

    /// Every error on `mask` becomes correctable; the positions were rebuilt
    pub fn correct_all_one_pos(&mut self, mask: PositionMask) {
        for kind in ErrorSet::KINDS {
            self.promote(kind, mask);
        }
    }

    /// Every non-checksum error on `mask` becomes correctable
    pub fn correct_all_non_crc_one_pos(&mut self, mask: PositionMask) {
        for kind in ErrorSet::KINDS {
            if kind != ErrorKind::Crc {
                self.promote(kind, mask);
            }
        }
    }

    /// Coherency pinned on both parities says nothing about which column
    /// was wrong, so it cannot count as corrected
    pub fn convert_coherency_errors(&mut self, parity: PositionMask) {
        for kind in [ErrorKind::Coh, ErrorKind::PocCoh] {
            if self.correctable.get(kind).includes(parity) {
                *self.correctable.get_mut(kind) = self.correctable.get(kind).without(parity);
                *self.uncorrectable.get_mut(kind) |= parity;
                warn!("error board: {} on both parities is uncorrectable", kind);
            }
        }
    }

    /// Report hard media errors: rebuilt positions are correctable checksum errors
    pub fn determine_media_errors(&mut self, width: PositionMask) {
        let media = self.hard_media_err & width;
        self.media_err |= media;
        self.correctable.crc |= media & self.m_bitmap;
    }
}
