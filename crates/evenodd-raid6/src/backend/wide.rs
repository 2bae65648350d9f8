//! 64-bit lane kernel
//!
//! Processes word pairs as one `u64` lane and folds the lane accumulator back
//! to 32 bits at the end. A trailing odd word is handled on its own.

use super::{KernelCapabilities, XorKernel};

#[derive(Clone, Copy, Debug, Default)]
pub struct WideKernel;

#[inline]
fn lane(pair: &[u32]) -> u64 {
    u64::from(pair[0]) | (u64::from(pair[1]) << 32)
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn fold(acc: u64) -> u32 {
    (acc as u32) ^ ((acc >> 32) as u32)
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn store(pair: &mut [u32], value: u64) {
    pair[0] = value as u32;
    pair[1] = (value >> 32) as u32;
}

impl XorKernel for WideKernel {
    fn capabilities(&self) -> KernelCapabilities {
        KernelCapabilities {
            name: "wide",
            lane_bits: 64,
            fused: true,
        }
    }

    fn raw_checksum(&self, words: &[u32]) -> u32 {
        let chunks = words.chunks_exact(2);
        let tail = chunks.remainder().iter().fold(0, |acc, w| acc ^ w);
        fold(chunks.fold(0u64, |acc, pair| acc ^ lane(pair))) ^ tail
    }

    fn xor_into(&self, dst: &mut [u32], src: &[u32]) {
        debug_assert_eq!(dst.len(), src.len());
        let mut dst_chunks = dst.chunks_exact_mut(2);
        let mut src_chunks = src.chunks_exact(2);
        for (d, s) in dst_chunks.by_ref().zip(src_chunks.by_ref()) {
            store(d, lane(d) ^ lane(s));
        }
        for (d, s) in dst_chunks
            .into_remainder()
            .iter_mut()
            .zip(src_chunks.remainder())
        {
            *d ^= s;
        }
    }

    fn xor_checksum(&self, dst: &mut [u32], src: &[u32]) -> u32 {
        debug_assert_eq!(dst.len(), src.len());
        let mut acc = 0u64;
        let mut dst_chunks = dst.chunks_exact_mut(2);
        let mut src_chunks = src.chunks_exact(2);
        for (d, s) in dst_chunks.by_ref().zip(src_chunks.by_ref()) {
            let value = lane(s);
            acc ^= value;
            store(d, lane(d) ^ value);
        }
        let mut tail = 0;
        for (d, s) in dst_chunks
            .into_remainder()
            .iter_mut()
            .zip(src_chunks.remainder())
        {
            *d ^= s;
            tail ^= s;
        }
        fold(acc) ^ tail
    }
}
