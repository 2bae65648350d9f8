//! End-to-end repair scenarios
//!
//! Each test builds a stripe the way the write path would, damages it the
//! way a drive or an interrupted write would, and checks outcome, stripe
//! contents and error board together.

#![cfg(test)]

use crate::eboard::{ErrorBoard, ErrorKind};
use crate::engine::Raid6Engine;
use crate::parity::compute_parity;
use crate::stripe::{EvalRequest, RepairOutcome, Stripe};
use evenodd_common::sector::SECTOR_WORDS;
use evenodd_common::{
    EngineConfig, InvalidReason, InvalidatedBy, PositionMask, Sector, StripeGeometry,
};
use rand::Rng;

fn mask(bits: u16) -> PositionMask {
    PositionMask::from_bits(bits)
}

fn written(engine: &Raid6Engine, width: usize, time_stamp: u16) -> Stripe {
    let mut rng = rand::thread_rng();
    let geometry = StripeGeometry::new(width, width - 2, width - 1).unwrap();
    let mut stripe = Stripe::new(geometry, 0x8_0000).with_offset(0x40);
    let data: Vec<[u32; SECTOR_WORDS]> = (0..width - 2)
        .map(|_| {
            let mut words = [0u32; SECTOR_WORDS];
            rng.fill(&mut words[..]);
            words
        })
        .collect();
    stripe.write_full(&data, time_stamp).unwrap();
    engine.encode(&mut stripe);
    stripe
}

fn evaluate(
    engine: &Raid6Engine,
    stripe: &mut Stripe,
    request: &EvalRequest,
) -> (RepairOutcome, ErrorBoard) {
    let mut eboard = ErrorBoard::new();
    let outcome = engine.evaluate(stripe, request, &mut eboard).unwrap();
    (outcome, eboard)
}

#[test]
fn test_zeroed_strip_rebuild() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = Stripe::new(StripeGeometry::new(6, 4, 5).unwrap(), 0x100);
    stripe.sector_mut(2).data.fill(0xA5A5_A5A5);

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(2));
    assert_eq!(
        outcome,
        RepairOutcome::Repaired {
            modified: PositionMask::bit(2)
        }
    );
    assert!(stripe.sectors().iter().all(Sector::is_zeroed));
    assert!(eboard.uncorrectable.is_empty());

    // nothing erased and nothing off-pattern: settled, nothing to write back
    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(
        outcome,
        RepairOutcome::Repaired {
            modified: PositionMask::EMPTY
        }
    );
    assert!(eboard.trace.is_empty());
}

#[test]
fn test_zeroed_strip_parity_erasures() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    for (request, lost) in [
        (EvalRequest::rebuild(4), mask(0b01_0000)),
        (EvalRequest::rebuild(5), mask(0b10_0000)),
        (EvalRequest::rebuild_pair(1, 5), mask(0b10_0010)),
    ] {
        let mut stripe = Stripe::new(StripeGeometry::new(6, 4, 5).unwrap(), 0x100);
        for pos in lost.iter() {
            stripe.sector_mut(pos).data.fill(0x5A5A_5A5A);
        }

        let (outcome, eboard) = evaluate(&engine, &mut stripe, &request);
        assert_eq!(outcome, RepairOutcome::Repaired { modified: lost });
        assert!(stripe.sectors().iter().all(Sector::is_zeroed));
        assert!(eboard.uncorrectable.is_empty());
    }
}

#[test]
fn test_reused_board_does_not_steer_next_stripe() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut eboard = ErrorBoard::new();

    let mut lost = written(&engine, 7, 0x0200);
    lost.sector_mut(0).data[4] ^= 0x10;
    lost.sector_mut(1).data[90] ^= 0x3;
    let outcome = engine
        .evaluate(&mut lost, &EvalRequest::rebuild(2), &mut eboard)
        .unwrap();
    assert!(outcome.is_uncorrectable());
    let findings = eboard.trace.len();

    let mut clean = written(&engine, 7, 0x0201);
    let before = clean.clone();
    let outcome = engine
        .evaluate(&mut clean, &EvalRequest::new(), &mut eboard)
        .unwrap();
    assert_eq!(outcome, RepairOutcome::Verified);
    assert_eq!(clean, before);
    assert_eq!(eboard.trace.len(), findings);

    let mut erased = written(&engine, 7, 0x0202);
    let expected = erased.clone();
    *erased.sector_mut(3) = Sector::zeroed();
    let outcome = engine
        .evaluate(&mut erased, &EvalRequest::rebuild(3), &mut eboard)
        .unwrap();
    assert_eq!(
        outcome,
        RepairOutcome::Repaired {
            modified: PositionMask::bit(3)
        }
    );
    assert_eq!(erased, expected);

    // the board still reports the first stripe's loss
    assert_eq!(eboard.invalid_bitmask, mask(0b111));
    assert!(eboard.uncorrectable.crc.includes(mask(0b11)));
}

#[test]
fn test_torn_write_rolls_back() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 8, 0x0510);
    let original = stripe.clone();

    // partial write to column 1 that never reached parity
    stripe.write_partial(1, [0x0BAD_F00D; SECTOR_WORDS]).unwrap();
    *stripe.sector_mut(3) = Sector::zeroed();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(3));
    assert_eq!(outcome, RepairOutcome::Repaired { modified: mask(0b1010) });
    assert_eq!(stripe, original);
    assert!(eboard.uncorrectable.is_empty());
    assert!(eboard.correctable.coh.is_empty());
}

#[test]
fn test_torn_column_kept_when_parity_followed() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 8, 0x0510);
    let original = stripe.clone();
    let torn = [0x0BAD_F00D; SECTOR_WORDS];
    stripe.write_partial(1, torn).unwrap();

    // parity payload took the new data; its POC and stamps did not
    let computed = compute_parity(engine.kernel(), &stripe);
    for (pos, fresh) in [(6, computed.row), (7, computed.diag)] {
        let sector = stripe.sector_mut(pos);
        sector.data = fresh.data;
        sector.seal();
    }
    *stripe.sector_mut(3) = Sector::zeroed();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(3));
    assert_eq!(
        outcome,
        RepairOutcome::Repaired {
            modified: mask(0b1100_1000)
        }
    );
    assert_eq!(stripe.sector(1).data, torn);
    assert_eq!(stripe.sector(3), original.sector(3));
    assert!(eboard.uncorrectable.is_empty());
    assert!(eboard.trace.iter().any(|t| t.kind == ErrorKind::Ts && t.code == 12));
    assert!(!eboard.correctable.ts.contains(1));

    let (outcome, _) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(outcome, RepairOutcome::Verified);
}

#[test]
fn test_double_rebuild_with_torn_column_fails_closed() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 8, 0x0510);
    stripe.write_partial(1, [0x0BAD_F00D; SECTOR_WORDS]).unwrap();
    let torn = stripe.sector(1).clone();
    for pos in [3, 4] {
        *stripe.sector_mut(pos) = Sector::zeroed();
    }

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild_pair(3, 4));
    assert!(matches!(
        outcome,
        RepairOutcome::NeedsInvalidate { positions, .. } if positions == mask(0b1_1000)
    ));
    assert!(eboard.trace.iter().any(|t| t.kind == ErrorKind::Crc && t.code == 6));
    for pos in [3, 4] {
        assert_eq!(
            stripe.sector(pos).invalidation(),
            Some((InvalidReason::Verify, InvalidatedBy::Raid))
        );
    }
    assert_eq!(*stripe.sector(1), torn);
}

#[test]
fn test_two_torn_columns_fail_closed() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 8, 0x0510);
    stripe.write_partial(1, [1; SECTOR_WORDS]).unwrap();
    stripe.write_partial(2, [2; SECTOR_WORDS]).unwrap();
    *stripe.sector_mut(0) = Sector::zeroed();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(0));
    assert!(outcome.is_uncorrectable());
    assert!(eboard.uncorrectable.crc.contains(0));
    assert_eq!(
        stripe.sector(0).invalidation(),
        Some((InvalidReason::Verify, InvalidatedBy::Raid))
    );
}

#[test]
fn test_three_failures_fail_closed() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 7, 0x0200);
    stripe.sector_mut(0).data[4] ^= 0x10;
    stripe.sector_mut(1).data[90] ^= 0x3;

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(2));
    assert_eq!(
        outcome,
        RepairOutcome::NeedsInvalidate {
            positions: mask(0b111),
            modified: mask(0b110_0111),
        }
    );
    assert_eq!(eboard.invalid_bitmask, mask(0b111));
    assert!(eboard.trace.iter().any(|t| t.kind == ErrorKind::Crc && t.code == 8));

    // the invalidated stripe is self-consistent and stays as it is
    let after = stripe.clone();
    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(
        outcome,
        RepairOutcome::NeedsInvalidate {
            positions: mask(0b111),
            modified: PositionMask::EMPTY,
        }
    );
    assert_eq!(stripe, after);
    assert_eq!(eboard.crc_raid, mask(0b111));
    assert!(eboard.uncorrectable.coh.is_empty());
}

#[test]
fn test_silent_corruption_rebuilds_parity_by_default() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 6, 0x0300);
    stripe.sector_mut(2).data[17] ^= 0x8000_0001;
    stripe.sector_mut(2).seal();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(outcome, RepairOutcome::Repaired { modified: mask(0b11_0000) });
    assert_eq!(eboard.uncorrectable.coh, mask(0b11_0000));

    // parity now follows the data
    let (outcome, _) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(outcome, RepairOutcome::Verified);
}

#[test]
fn test_silent_corruption_localized() {
    let config = EngineConfig {
        exact_localization: true,
        ..EngineConfig::default()
    };
    let engine = Raid6Engine::new(config).unwrap();
    for width in [5, 9, 16] {
        let mut stripe = written(&engine, width, 0x0300);
        let original = stripe.clone();
        stripe.sector_mut(1).data[100] ^= 0x0F0F;
        stripe.sector_mut(1).seal();

        let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::new());
        assert_eq!(
            outcome,
            RepairOutcome::Repaired {
                modified: PositionMask::bit(1)
            }
        );
        assert_eq!(stripe, original);
        assert_eq!(eboard.correctable.coh, PositionMask::bit(1));
        assert!(eboard.uncorrectable.is_empty());
    }
}

#[test]
fn test_client_invalidated_sector_reported() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 6, 0x0300);
    stripe
        .sector_mut(3)
        .invalidate(InvalidReason::DataLost, InvalidatedBy::Client, 0x8_0000);
    engine.encode(&mut stripe);
    let before = stripe.clone();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::new());
    assert_eq!(
        outcome,
        RepairOutcome::NeedsInvalidate {
            positions: PositionMask::bit(3),
            modified: PositionMask::EMPTY,
        }
    );
    assert_eq!(stripe, before);
    assert_eq!(eboard.crc_invalid, PositionMask::bit(3));
    assert!(eboard.uncorrectable.coh.is_empty());
}

#[test]
fn test_rebuild_invalidated_sector_keeps_pattern() {
    let engine = Raid6Engine::new(EngineConfig::default()).unwrap();
    let mut stripe = written(&engine, 6, 0x0300);
    stripe
        .sector_mut(0)
        .invalidate(InvalidReason::CorruptCrc, InvalidatedBy::Client, 0x8_0000);
    engine.encode(&mut stripe);
    let expected = stripe.sector(0).clone();
    *stripe.sector_mut(0) = Sector::zeroed();

    let (outcome, eboard) = evaluate(&engine, &mut stripe, &EvalRequest::rebuild(0));
    assert_eq!(
        outcome,
        RepairOutcome::NeedsInvalidate {
            positions: PositionMask::bit(0),
            modified: PositionMask::bit(0),
        }
    );
    assert_eq!(stripe.sector(0).data, expected.data);
    assert_eq!(stripe.sector(0).crc, expected.crc);
    assert_eq!(eboard.corrupt_crc, PositionMask::bit(0));
    assert!(eboard.uncorrectable.coh.is_empty());
}
