//! Core type definitions for the RAID-6 engine
//!
//! Position bitmaps, stripe geometry and kernel selection.

use crate::error::{Error, Result};
use derive_more::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, From, Into, Not};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum stripe width (one bit per position in a 16-bit bitmap)
pub const MAX_WIDTH: usize = 16;

/// Minimum stripe width: two data columns plus both parities
pub const MIN_WIDTH: usize = 4;

/// Bitmap of stripe positions, bit `n` for physical position `n`
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    From,
    Into,
    BitAnd,
    BitAndAssign,
    BitOr,
    BitOrAssign,
    BitXor,
    Not,
    Serialize,
    Deserialize,
)]
pub struct PositionMask(u16);

impl PositionMask {
    /// No positions
    pub const EMPTY: Self = Self(0);

    /// Mask with a single position set (empty if out of range)
    #[must_use]
    pub const fn bit(pos: usize) -> Self {
        if pos < MAX_WIDTH { Self(1 << pos) } else { Self::EMPTY }
    }

    /// Mask covering positions `0..width`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn full(width: usize) -> Self {
        if width >= MAX_WIDTH {
            Self(u16::MAX)
        } else {
            Self(((1u32 << width) - 1) as u16)
        }
    }

    /// Create from raw bits
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, pos: usize) -> bool {
        pos < MAX_WIDTH && self.0 & (1 << pos) != 0
    }

    /// Check whether any position is shared with `other`
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Check whether every position of `other` is in `self`
    #[must_use]
    pub const fn includes(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of positions set
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// `self` with the positions of `other` removed
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn insert(&mut self, pos: usize) {
        *self |= Self::bit(pos);
    }

    pub fn remove(&mut self, pos: usize) {
        *self = self.without(Self::bit(pos));
    }

    /// Lowest position set
    #[must_use]
    pub const fn first(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Positions set, ascending
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_WIDTH).filter(move |&pos| self.contains(pos))
    }
}

impl fmt::Debug for PositionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionMask({:#06x})", self.0)
    }
}

impl fmt::Display for PositionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl FromIterator<usize> for PositionMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |acc, pos| acc | Self::bit(pos))
    }
}

const NOT_DATA: u8 = u8::MAX;

/// Stripe layout: width, parity positions and the logical order of data
///
/// Data columns are numbered `0..width - 2` in logical order; the EVENODD
/// diagonals are defined over logical columns, not physical positions.
#[derive(Clone, PartialEq, Eq)]
pub struct StripeGeometry {
    width: usize,
    row_parity: usize,
    diag_parity: usize,
    /// Physical position to logical data column
    logical: [u8; MAX_WIDTH],
    /// Logical data column to physical position
    physical: [u8; MAX_WIDTH],
}

impl StripeGeometry {
    /// Geometry with data columns in ascending physical order
    pub fn new(width: usize, row_parity: usize, diag_parity: usize) -> Result<Self> {
        let order: Vec<usize> = (0..width)
            .filter(|&pos| pos != row_parity && pos != diag_parity)
            .collect();
        Self::with_data_order(width, row_parity, diag_parity, &order)
    }

    /// Geometry with an explicit logical data order (`order[logical] = physical`)
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_data_order(
        width: usize,
        row_parity: usize,
        diag_parity: usize,
        order: &[usize],
    ) -> Result<Self> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            return Err(Error::InvalidWidth {
                width,
                min: MIN_WIDTH,
                max: MAX_WIDTH,
            });
        }
        for position in [row_parity, diag_parity] {
            if position >= width {
                return Err(Error::InvalidPosition { position, width });
            }
        }
        if row_parity == diag_parity {
            return Err(Error::precondition(format!(
                "row and diagonal parity share position {row_parity}"
            )));
        }
        if order.len() != width - 2 {
            return Err(Error::precondition(format!(
                "data order names {} columns, stripe has {}",
                order.len(),
                width - 2
            )));
        }

        let mut logical = [NOT_DATA; MAX_WIDTH];
        let mut physical = [NOT_DATA; MAX_WIDTH];
        for (column, &position) in order.iter().enumerate() {
            if position >= width {
                return Err(Error::InvalidPosition { position, width });
            }
            if position == row_parity || position == diag_parity {
                return Err(Error::precondition(format!(
                    "data order names parity position {position}"
                )));
            }
            if logical[position] != NOT_DATA {
                return Err(Error::precondition(format!(
                    "data order names position {position} twice"
                )));
            }
            logical[position] = column as u8;
            physical[column] = position as u8;
        }

        Ok(Self {
            width,
            row_parity,
            diag_parity,
            logical,
            physical,
        })
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of data columns
    #[must_use]
    pub const fn data_columns(&self) -> usize {
        self.width - 2
    }

    #[must_use]
    pub const fn row_parity(&self) -> usize {
        self.row_parity
    }

    #[must_use]
    pub const fn diag_parity(&self) -> usize {
        self.diag_parity
    }

    #[must_use]
    pub const fn parity_mask(&self) -> PositionMask {
        PositionMask(PositionMask::bit(self.row_parity).0 | PositionMask::bit(self.diag_parity).0)
    }

    #[must_use]
    pub const fn full_mask(&self) -> PositionMask {
        PositionMask::full(self.width)
    }

    #[must_use]
    pub const fn data_mask(&self) -> PositionMask {
        self.full_mask().without(self.parity_mask())
    }

    #[must_use]
    pub const fn is_parity(&self, pos: usize) -> bool {
        pos == self.row_parity || pos == self.diag_parity
    }

    /// Logical data column of a physical position (`None` for parity)
    #[must_use]
    pub fn logical_column(&self, pos: usize) -> Option<usize> {
        match self.logical.get(pos) {
            Some(&column) if column != NOT_DATA && pos < self.width => Some(usize::from(column)),
            _ => None,
        }
    }

    /// Physical position of a logical data column
    #[must_use]
    pub fn data_position(&self, column: usize) -> Option<usize> {
        (column < self.data_columns()).then(|| usize::from(self.physical[column]))
    }

    /// Data positions in logical order
    pub fn data_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.physical[..self.data_columns()]
            .iter()
            .map(|&pos| usize::from(pos))
    }

    /// Validate a position against the width
    pub fn check_position(&self, position: usize) -> Result<()> {
        if position < self.width {
            Ok(())
        } else {
            Err(Error::InvalidPosition {
                position,
                width: self.width,
            })
        }
    }
}

impl fmt::Debug for StripeGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGeometry")
            .field("width", &self.width)
            .field("row_parity", &self.row_parity)
            .field("diag_parity", &self.diag_parity)
            .field("data", &self.data_positions().collect::<Vec<_>>())
            .finish()
    }
}

/// XOR/checksum kernel selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// Reference implementation, one 32-bit word at a time
    Portable,
    /// 64-bit lanes
    Wide,
    /// Pick the best kernel for this platform once, at engine construction
    #[default]
    Auto,
}

impl KernelKind {
    /// Get the kernel name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Portable => "portable",
            Self::Wide => "wide",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for KernelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "portable" | "reference" | "scalar" => Ok(Self::Portable),
            "wide" | "u64" | "lanes" => Ok(Self::Wide),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(format!("unknown kernel: {s}")),
        }
    }
}
