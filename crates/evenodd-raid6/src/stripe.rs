//! Stripes, evaluation requests and outcomes

use evenodd_common::sector::SECTOR_WORDS;
use evenodd_common::stamps::{INVALID_TSTAMP, generate_lba_stamp};
use evenodd_common::{Error, PositionMask, Result, Sector, StripeGeometry};

/// One stripe row: a sector per position plus its address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stripe {
    sectors: Vec<Sector>,
    geometry: StripeGeometry,
    lba: u64,
    offset: u64,
}

impl Stripe {
    /// A stripe of canonical never-written sectors
    #[must_use]
    pub fn new(geometry: StripeGeometry, lba: u64) -> Self {
        Self {
            sectors: vec![Sector::zeroed(); geometry.width()],
            geometry,
            lba,
            offset: 0,
        }
    }

    /// A stripe from existing sectors, one per position
    pub fn from_sectors(geometry: StripeGeometry, sectors: Vec<Sector>, lba: u64) -> Result<Self> {
        if sectors.len() != geometry.width() {
            return Err(Error::precondition(format!(
                "stripe of width {} given {} sectors",
                geometry.width(),
                sectors.len()
            )));
        }
        Ok(Self {
            sectors,
            geometry,
            lba,
            offset: 0,
        })
    }

    /// Set the RAID group offset mixed into LBA stamps
    #[must_use]
    pub const fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    #[must_use]
    pub const fn lba(&self) -> u64 {
        self.lba
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut [Sector] {
        &mut self.sectors
    }

    #[must_use]
    pub fn sector(&self, pos: usize) -> &Sector {
        &self.sectors[pos]
    }

    pub fn sector_mut(&mut self, pos: usize) -> &mut Sector {
        &mut self.sectors[pos]
    }

    /// LBA stamp data sectors of this stripe should carry
    #[must_use]
    pub const fn lba_stamp(&self) -> u16 {
        generate_lba_stamp(self.lba, self.offset)
    }

    /// Full-stripe write: every data column gets new data and `time_stamp`
    ///
    /// Parity is not touched; run the engine's `encode` afterwards.
    pub fn write_full(&mut self, data: &[[u32; SECTOR_WORDS]], time_stamp: u16) -> Result<()> {
        if data.len() != self.geometry.data_columns() {
            return Err(Error::precondition(format!(
                "full write of {} columns to a stripe with {} data columns",
                data.len(),
                self.geometry.data_columns()
            )));
        }
        let stamp = self.lba_stamp();
        let positions: Vec<usize> = self.geometry.data_positions().collect();
        for (pos, words) in positions.into_iter().zip(data) {
            let sector = &mut self.sectors[pos];
            *sector = Sector::with_data(*words);
            sector.lba_stamp = stamp;
            sector.time_stamp = time_stamp;
            sector.write_stamp = 0;
        }
        Ok(())
    }

    /// Partial write of one logical data column
    ///
    /// The column's time stamp becomes invalid and its write stamp its own
    /// position bit. Parity is not touched.
    pub fn write_partial(&mut self, column: usize, words: [u32; SECTOR_WORDS]) -> Result<()> {
        let pos = self.geometry.data_position(column).ok_or_else(|| {
            Error::precondition(format!("no data column {column} in {:?}", self.geometry))
        })?;
        let stamp = self.lba_stamp();
        let sector = &mut self.sectors[pos];
        *sector = Sector::with_data(words);
        sector.lba_stamp = stamp;
        sector.time_stamp = INVALID_TSTAMP;
        sector.write_stamp = PositionMask::bit(pos).bits();
        Ok(())
    }
}

/// What the caller knows about the stripe before evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalRequest {
    /// Positions being rebuilt (at most two)
    pub rebuild: [Option<usize>; 2],
    /// Positions whose read failed with a hard media error
    pub media_errors: PositionMask,
    /// Positions whose read failed but may succeed on retry
    pub retry_errors: PositionMask,
    /// Positions with no data (e.g. drive missing)
    pub no_data: PositionMask,
    /// No further retry will follow; rebuild parity even with errors left
    pub final_recovery_attempt: bool,
}

impl Default for EvalRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalRequest {
    /// A verify request: nothing known bad
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rebuild: [None, None],
            media_errors: PositionMask::EMPTY,
            retry_errors: PositionMask::EMPTY,
            no_data: PositionMask::EMPTY,
            final_recovery_attempt: true,
        }
    }

    /// Rebuild one position
    #[must_use]
    pub const fn rebuild(pos: usize) -> Self {
        let mut request = Self::new();
        request.rebuild[0] = Some(pos);
        request
    }

    /// Rebuild two positions
    #[must_use]
    pub const fn rebuild_pair(first: usize, second: usize) -> Self {
        let mut request = Self::new();
        request.rebuild = [Some(first), Some(second)];
        request
    }

    #[must_use]
    pub const fn with_media_errors(mut self, mask: PositionMask) -> Self {
        self.media_errors = mask;
        self
    }

    #[must_use]
    pub const fn with_retry_errors(mut self, mask: PositionMask) -> Self {
        self.retry_errors = mask;
        self
    }

    #[must_use]
    pub const fn with_no_data(mut self, mask: PositionMask) -> Self {
        self.no_data = mask;
        self
    }

    #[must_use]
    pub const fn with_final_recovery_attempt(mut self, final_attempt: bool) -> Self {
        self.final_recovery_attempt = final_attempt;
        self
    }

    /// Rebuild positions as a bitmap
    #[must_use]
    pub fn rebuild_mask(&self) -> PositionMask {
        self.rebuild.iter().flatten().copied().collect()
    }
}

/// Result of one evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Stripe was coherent; nothing changed
    Verified,
    /// Stripe was repaired, or recognised as never written and settled
    /// with the zeroed pattern; write back `modified` (possibly empty)
    Repaired { modified: PositionMask },
    /// Data in `positions` is lost and was replaced with invalidated
    /// sectors; write back `modified` and report the loss
    NeedsInvalidate {
        positions: PositionMask,
        modified: PositionMask,
    },
}

impl RepairOutcome {
    /// Positions to write back
    #[must_use]
    pub const fn modified(&self) -> PositionMask {
        match self {
            Self::Verified => PositionMask::EMPTY,
            Self::Repaired { modified } | Self::NeedsInvalidate { modified, .. } => *modified,
        }
    }

    #[must_use]
    pub const fn is_uncorrectable(&self) -> bool {
        matches!(self, Self::NeedsInvalidate { .. })
    }
}
