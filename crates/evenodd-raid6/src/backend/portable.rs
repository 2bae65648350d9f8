//! Portable reference kernel

use super::{KernelCapabilities, XorKernel};

/// One 32-bit word at a time
#[derive(Clone, Copy, Debug, Default)]
pub struct PortableKernel;

impl XorKernel for PortableKernel {
    fn capabilities(&self) -> KernelCapabilities {
        KernelCapabilities {
            name: "portable",
            lane_bits: 32,
            fused: true,
        }
    }

    fn raw_checksum(&self, words: &[u32]) -> u32 {
        evenodd_common::checksum::raw_checksum(words)
    }

    fn xor_into(&self, dst: &mut [u32], src: &[u32]) {
        debug_assert_eq!(dst.len(), src.len());
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= s;
        }
    }

    fn xor_checksum(&self, dst: &mut [u32], src: &[u32]) -> u32 {
        debug_assert_eq!(dst.len(), src.len());
        let mut raw = 0;
        for (d, &s) in dst.iter_mut().zip(src) {
            *d ^= s;
            raw ^= s;
        }
        raw
    }
}
