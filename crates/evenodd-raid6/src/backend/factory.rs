//! Kernel factory
//!
//! Resolves a [`KernelKind`] to a concrete kernel once, at engine
//! construction, based on platform and feature flags.

use super::{KernelCapabilities, PortableKernel, XorKernel};
use evenodd_common::{KernelKind, Result};
use std::sync::Arc;

/// Factory for creating kernels
pub struct KernelFactory;

impl KernelFactory {
    /// Create a kernel
    ///
    /// `Auto` resolves through [`Self::detect_best_kernel`]. Asking for a
    /// kernel that was not compiled in is a configuration error.
    pub fn create(kind: KernelKind) -> Result<Arc<dyn XorKernel>> {
        let kind = match kind {
            KernelKind::Auto => Self::detect_best_kernel(),
            other => other,
        };

        match kind {
            KernelKind::Wide => {
                #[cfg(feature = "wide-kernel")]
                {
                    Ok(Arc::new(super::WideKernel))
                }
                #[cfg(not(feature = "wide-kernel"))]
                {
                    Err(evenodd_common::Error::Config(
                        "wide kernel not available in this build".into(),
                    ))
                }
            }
            KernelKind::Portable | KernelKind::Auto => Ok(Arc::new(PortableKernel)),
        }
    }

    /// Detect the best kernel for this platform
    #[must_use]
    pub const fn detect_best_kernel() -> KernelKind {
        if cfg!(all(feature = "wide-kernel", target_pointer_width = "64")) {
            KernelKind::Wide
        } else {
            KernelKind::Portable
        }
    }

    /// List the kernels compiled into this build
    #[must_use]
    pub fn available_kernels() -> Vec<KernelCapabilities> {
        let mut kernels = vec![PortableKernel.capabilities()];

        #[cfg(feature = "wide-kernel")]
        kernels.push(super::WideKernel.capabilities());

        kernels
    }
}
