//! XOR/checksum kernel abstraction
//!
//! All payload work in the engine reduces to two primitives: XOR one run of
//! words into another, and fold a run of words into a raw checksum. A kernel
//! provides both, plus a fused form that does them in a single pass.
//!
//! # Kernels
//!
//! - `portable`: one 32-bit word at a time; the reference implementation
//! - `wide`: 64-bit lanes (feature `wide-kernel`, default on)
//!
//! The kernel is chosen once when the engine is built and held as an
//! immutable capability; every accelerated kernel must agree bit for bit
//! with `portable`, which the tests below check differentially.

pub mod factory;
pub mod portable;

#[cfg(feature = "wide-kernel")]
pub mod wide;

pub use factory::KernelFactory;
pub use portable::PortableKernel;

#[cfg(feature = "wide-kernel")]
pub use wide::WideKernel;

/// Capabilities of a kernel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelCapabilities {
    /// Kernel name for identification
    pub name: &'static str,
    /// Width of one XOR lane in bits
    pub lane_bits: u32,
    /// Whether `xor_checksum` is a genuinely fused single pass
    pub fused: bool,
}

/// Core trait for XOR/checksum kernels
pub trait XorKernel: Send + Sync {
    /// Get kernel capabilities
    fn capabilities(&self) -> KernelCapabilities;

    /// Raw checksum (XOR of all words) of `words`
    fn raw_checksum(&self, words: &[u32]) -> u32;

    /// XOR `src` into `dst`
    ///
    /// Both slices must have the same length.
    fn xor_into(&self, dst: &mut [u32], src: &[u32]);

    /// XOR `src` into `dst` and return the raw checksum of `src`
    fn xor_checksum(&self, dst: &mut [u32], src: &[u32]) -> u32 {
        self.xor_into(dst, src);
        self.raw_checksum(src)
    }
}
