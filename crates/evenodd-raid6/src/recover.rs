//! EVENODD erasure recovery identities
//!
//! Pure functions over syndrome planes, generic over the symbol type so the
//! same index recurrences serve both the data plane ([`Symbol`]) and the
//! one-bit checksum plane (`bool`).
//!
//! All functions take syndromes accumulated over the *surviving* columns
//! (data and parity). For a coherent stripe the full row syndrome is zero and
//! every diagonal slot holds the S-value; what is left over is exactly the
//! contribution of the missing columns.
//!
//! [`Symbol`]: crate::symbol::Symbol

use crate::symbol::{IMAGINARY, M, Plane, diagonal_of, modulo, s_diagonal};
use std::ops::BitXor;

/// Values the recovery chains can run over
pub trait PlaneValue: Copy + Default + PartialEq + BitXor<Output = Self> {}

impl<T: Copy + Default + PartialEq + BitXor<Output = T>> PlaneValue for T {}

/// Recover a missing column from the row syndrome (row parity alive)
#[must_use]
pub fn recover_from_row<T: PlaneValue>(row: &Plane<T>) -> Plane<T> {
    let mut column = *row;
    column[IMAGINARY] = T::default();
    column
}

/// Recover missing logical column `column` from the diagonal syndrome
/// (diagonal parity alive)
///
/// The slot where the column's imaginary row lands carries only the S-value;
/// every other slot carries the S-value plus one real symbol of the column.
#[must_use]
pub fn recover_from_diagonal<T: PlaneValue>(diag: &Plane<T>, column: usize) -> Plane<T> {
    let s_value = diag[s_diagonal(column)];
    let mut out = [T::default(); M];
    for (row, value) in out.iter_mut().enumerate().take(IMAGINARY) {
        *value = diag[diagonal_of(row, column)] ^ s_value;
    }
    out
}

/// S-value of a stripe missing two data columns (both parities alive)
///
/// Every diagonal slot carries S plus the missing symbols on it; summed over
/// all 17 slots that is S plus every missing symbol, which the row syndrome
/// sums to as well.
#[must_use]
pub fn pair_s_value<T: PlaneValue>(row: &Plane<T>, diag: &Plane<T>) -> T {
    row.iter()
        .chain(diag.iter())
        .fold(T::default(), |acc, &value| acc ^ value)
}

/// Recover two missing logical data columns `i` and `j`
///
/// Starts from the diagonal whose column-`i` member is the imaginary row,
/// then zig-zags: each recovered symbol of `j` yields the symbol of `i` on the
/// same row, which in turn opens the next diagonal. The walk ends on the
/// imaginary row of `j` after visiting all 16 real rows.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn recover_pair<T: PlaneValue>(
    row: &Plane<T>,
    diag: &Plane<T>,
    i: usize,
    j: usize,
) -> (Plane<T>, Plane<T>) {
    debug_assert_ne!(i, j);
    let s_value = pair_s_value(row, diag);
    let step = i as isize - j as isize;

    let mut col_i = [T::default(); M];
    let mut col_j = [T::default(); M];
    let mut prev_i = T::default();
    let mut s = modulo(step - 1);
    while s != IMAGINARY {
        col_j[s] = diag[diagonal_of(s, j)] ^ s_value ^ prev_i;
        col_i[s] = row[s] ^ col_j[s];
        prev_i = col_i[s];
        s = modulo(s as isize + step);
    }
    (col_i, col_j)
}
