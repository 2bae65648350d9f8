//! Property-based tests for the repair engine
//!
//! # Properties
//!
//! 1. **Single erasure**: any one lost column comes back bit-exact
//! 2. **Double erasure**: any two lost columns come back bit-exact
//! 3. **Verify idempotence**: a coherent stripe verifies without mutation
//! 4. **Kernel equivalence**: every kernel computes the same checksums,
//!    syndromes and outcomes as the portable reference
//! 5. **Recovery chain**: the generic pair recovery inverts the syndromes

#![cfg(test)]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::backend::{KernelFactory, PortableKernel, XorKernel};
use crate::eboard::ErrorBoard;
use crate::engine::Raid6Engine;
use crate::recover::recover_pair;
use crate::stripe::{EvalRequest, RepairOutcome, Stripe};
use crate::symbol::{M, Plane, diagonal_of};
use evenodd_common::sector::SECTOR_WORDS;
use evenodd_common::{EngineConfig, KernelKind, PositionMask, Sector, StripeGeometry};

// =============================================================================
// Strategies
// =============================================================================

/// Width plus two distinct parity positions anywhere in the stripe
fn geometry_strategy() -> impl Strategy<Value = StripeGeometry> {
    (4usize..=16)
        .prop_flat_map(|width| (Just(width), 0..width, 1..width))
        .prop_map(|(width, row, shift)| {
            StripeGeometry::new(width, row, (row + shift) % width).unwrap()
        })
}

fn encoded_stripe(engine: &Raid6Engine, geometry: StripeGeometry, seed: u64) -> Stripe {
    let mut rng = StdRng::seed_from_u64(seed);
    let columns = geometry.data_columns();
    let mut stripe = Stripe::new(geometry, rng.gen_range(0..1 << 48));
    let data: Vec<[u32; SECTOR_WORDS]> = (0..columns)
        .map(|_| {
            let mut words = [0u32; SECTOR_WORDS];
            rng.fill(&mut words[..]);
            words
        })
        .collect();
    stripe.write_full(&data, rng.gen_range(1..0x7000)).unwrap();
    engine.encode(&mut stripe);
    stripe
}

fn engine() -> Raid6Engine {
    Raid6Engine::new(EngineConfig::default()).unwrap()
}

// =============================================================================
// Repair Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: one lost column of any kind is rebuilt exactly.
    #[test]
    fn prop_single_erasure_round_trip(
        geometry in geometry_strategy(),
        seed in any::<u64>(),
        pick in any::<prop::sample::Index>(),
    ) {
        let engine = engine();
        let mut stripe = encoded_stripe(&engine, geometry, seed);
        let expected = stripe.clone();
        let lost = pick.index(stripe.geometry().width());
        *stripe.sector_mut(lost) = Sector::zeroed();

        let mut eboard = ErrorBoard::new();
        let outcome = engine.evaluate(&mut stripe, &EvalRequest::rebuild(lost), &mut eboard)?;
        prop_assert_eq!(outcome, RepairOutcome::Repaired { modified: PositionMask::bit(lost) });
        prop_assert_eq!(stripe, expected);
        prop_assert!(eboard.uncorrectable.is_empty());
    }

    /// Property: any two lost columns are rebuilt exactly.
    #[test]
    fn prop_double_erasure_round_trip(
        geometry in geometry_strategy(),
        seed in any::<u64>(),
        first in any::<prop::sample::Index>(),
        shift in any::<prop::sample::Index>(),
    ) {
        let engine = engine();
        let mut stripe = encoded_stripe(&engine, geometry, seed);
        let expected = stripe.clone();
        let width = stripe.geometry().width();
        let a = first.index(width);
        let b = (a + 1 + shift.index(width - 1)) % width;
        for pos in [a, b] {
            stripe.sector_mut(pos).data.fill(0xFFFF_FFFF);
        }

        let mut eboard = ErrorBoard::new();
        let outcome = engine.evaluate(&mut stripe, &EvalRequest::rebuild_pair(a, b), &mut eboard)?;
        let lost = PositionMask::bit(a) | PositionMask::bit(b);
        prop_assert_eq!(outcome, RepairOutcome::Repaired { modified: lost });
        prop_assert_eq!(stripe, expected);
        prop_assert!(eboard.uncorrectable.is_empty());
    }

    /// Property: a coherent stripe verifies and nothing changes, even on a
    /// board that already carries another stripe's losses.
    #[test]
    fn prop_verify_idempotent(
        geometry in geometry_strategy(),
        seed in any::<u64>(),
        rounds in 1usize..4,
    ) {
        let engine = engine();
        let mut eboard = ErrorBoard::new();

        // both parities erased and every data column corrupt
        let mut lost = encoded_stripe(&engine, geometry.clone(), !seed);
        let data: Vec<usize> = lost.geometry().data_positions().collect();
        for &pos in &data {
            lost.sector_mut(pos).data[0] ^= 1;
        }
        let parity = EvalRequest::rebuild_pair(geometry.row_parity(), geometry.diag_parity());
        let outcome = engine.evaluate(&mut lost, &parity, &mut eboard)?;
        prop_assert!(outcome.is_uncorrectable());
        let findings = eboard.trace.len();

        let mut stripe = encoded_stripe(&engine, geometry, seed);
        let expected = stripe.clone();
        for _ in 0..rounds {
            let outcome = engine.evaluate(&mut stripe, &EvalRequest::new(), &mut eboard)?;
            prop_assert_eq!(outcome, RepairOutcome::Verified);
        }
        prop_assert_eq!(stripe, expected);
        prop_assert_eq!(eboard.trace.len(), findings);
    }

    /// Property: a single silently corrupted data word never goes unnoticed.
    #[test]
    fn prop_silent_corruption_detected(
        geometry in geometry_strategy(),
        seed in any::<u64>(),
        pick in any::<prop::sample::Index>(),
        word in 0..SECTOR_WORDS,
        flip in 1u32..,
    ) {
        let engine = engine();
        let mut stripe = encoded_stripe(&engine, geometry, seed);
        let data: Vec<usize> = stripe.geometry().data_positions().collect();
        let pos = data[pick.index(data.len())];
        let sector = stripe.sector_mut(pos);
        sector.data[word] ^= flip;
        sector.seal();

        let mut eboard = ErrorBoard::new();
        let outcome = engine.evaluate(&mut stripe, &EvalRequest::new(), &mut eboard)?;
        prop_assert_ne!(outcome, RepairOutcome::Verified);
        prop_assert!(!eboard.uncorrectable.is_empty());
    }
}

// =============================================================================
// Kernel Equivalence
// =============================================================================

fn kernels() -> Vec<Arc<dyn XorKernel>> {
    let mut kernels: Vec<Arc<dyn XorKernel>> = vec![Arc::new(PortableKernel)];
    if let Ok(wide) = KernelFactory::create(KernelKind::Wide) {
        kernels.push(wide);
    }
    kernels
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: every kernel agrees with the portable reference word for word.
    #[test]
    fn prop_kernels_agree(
        src in prop::collection::vec(any::<u32>(), 0..300),
        seed in any::<u32>(),
    ) {
        let reference = PortableKernel;
        let mut expected = vec![seed; src.len()];
        let expected_raw = reference.xor_checksum(&mut expected, &src);
        for kernel in kernels() {
            let mut dst = vec![seed; src.len()];
            prop_assert_eq!(kernel.xor_checksum(&mut dst, &src), expected_raw);
            prop_assert_eq!(&dst, &expected);
            prop_assert_eq!(kernel.raw_checksum(&src), expected_raw);
        }
    }

    /// Property: engines differing only in kernel produce identical results.
    #[test]
    fn prop_engines_agree(
        geometry in geometry_strategy(),
        seed in any::<u64>(),
        pick in any::<prop::sample::Index>(),
        flip in 1u32..,
    ) {
        let mut results = Vec::new();
        for kernel in kernels() {
            let engine = Raid6Engine::with_kernel(kernel, EngineConfig::default())?;
            let mut stripe = encoded_stripe(&engine, geometry.clone(), seed);
            let pos = pick.index(geometry.width());
            stripe.sector_mut(pos).data[3] ^= flip;
            let mut eboard = ErrorBoard::new();
            let outcome = engine.evaluate(&mut stripe, &EvalRequest::rebuild(pos), &mut eboard)?;
            results.push((outcome, stripe, eboard.trace));
        }
        for pair in results.windows(2) {
            prop_assert_eq!(&pair[0], &pair[1]);
        }
    }
}

// =============================================================================
// Recovery Chain
// =============================================================================

/// What survivors leave in the syndromes: the missing pair's contribution
fn pair_syndromes(columns: &[Plane<u32>], i: usize, j: usize) -> (Plane<u32>, Plane<u32>) {
    let mut row = [0u32; M];
    let mut diag = [0u32; M];
    for c in [i, j] {
        for r in 0..M {
            row[r] ^= columns[c][r];
            diag[diagonal_of(r, c)] ^= columns[c][r];
        }
    }
    (row, diag)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: the zig-zag chain recovers any pair of columns.
    #[test]
    fn prop_recover_pair(
        columns in prop::collection::vec(prop::array::uniform16(any::<u32>()), 2..=M - 1),
        first in any::<prop::sample::Index>(),
        shift in any::<prop::sample::Index>(),
    ) {
        // row 16 is the imaginary all-zero row
        let columns: Vec<Plane<u32>> = columns
            .iter()
            .map(|rows| {
                let mut plane = [0u32; M];
                plane[..M - 1].copy_from_slice(rows);
                plane
            })
            .collect();
        let n = columns.len();
        let i = first.index(n);
        let j = (i + 1 + shift.index(n - 1)) % n;
        let (row, diag) = pair_syndromes(&columns, i, j);
        let (got_i, got_j) = recover_pair(&row, &diag, i, j);
        prop_assert_eq!(got_i, columns[i]);
        prop_assert_eq!(got_j, columns[j]);
    }
}
