// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Platform abstraction for the secure kernel core.

#[cfg(any(not(target_arch = "riscv64"), test))]
pub mod fake;
#[cfg(all(target_arch = "riscv64", not(test)))]
mod virt;

use crate::{entropy::EntropySource, logger::LogSink};
use core::cell::RefCell;
use percore::{Cores, ExceptionLock, PerCore};

#[cfg(any(not(target_arch = "riscv64"), test))]
pub use fake::{FakePlatform as PlatformImpl, exception_free};
#[cfg(all(target_arch = "riscv64", not(test)))]
pub use virt::{Virt as PlatformImpl, take_channel_pages};

#[cfg(all(target_arch = "riscv64", not(test)))]
pub use crate::riscv64::exception_free;

/// The log sink of the active platform.
pub type LogSinkImpl = <PlatformImpl as Platform>::LogSinkImpl;

/// The entropy source of the active platform.
pub type EntropyImpl = <PlatformImpl as Platform>::EntropyImpl;

/// Per-core state of type `T`, accessible only with exceptions masked.
pub type PerCoreState<T> =
    PerCore<[ExceptionLock<RefCell<T>>; PlatformImpl::CORE_COUNT], CoresImpl>;

/// The hooks a platform provides to the rest of the crate.
pub trait Platform {
    /// The number of cores that may enter the secure kernel.
    const CORE_COUNT: usize;

    /// The number of secure thread contexts in the pool.
    const THREAD_COUNT: usize;

    /// Where log lines are sent.
    type LogSinkImpl: LogSink;

    /// Where resume token entropy comes from.
    type EntropyImpl: EntropySource;

    /// One-time initialisation, called before anything else in the crate.
    fn init();

    /// Translates a virtual address in the secure image to its physical
    /// address, for registration with the firmware layer.
    fn virt_to_phys(va: usize) -> usize;

    /// Handles an interrupt targeted at the secure domain itself.
    fn handle_native_interrupt();
}

#[cfg(all(target_arch = "riscv64", not(test)))]
use crate::riscv64::core_index as current_core_index;
#[cfg(any(not(target_arch = "riscv64"), test))]
use fake::core_index as current_core_index;

/// Provides the linear index of the current core.
pub struct CoresImpl;

// SAFETY: Both implementations return a stable index below CORE_COUNT for the
// calling core. On riscv64 the index is written to the thread pointer by early
// boot code and never changed; the fake keeps a per-thread index so that host
// tests behave like independent cores.
unsafe impl Cores for CoresImpl {
    fn core_index() -> usize {
        current_core_index()
    }
}
