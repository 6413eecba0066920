// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Supervisor-mode CSR and register helpers.

use core::arch::asm;
use percore::ExceptionFree;

/// Supervisor interrupt enable bit of `sstatus`.
const SSTATUS_SIE: u64 = 1 << 1;

/// Runs the given function with all maskable interrupts masked on the current
/// core, restoring the previous mask state afterwards.
pub fn exception_free<T>(f: impl FnOnce(ExceptionFree) -> T) -> T {
    let previous: u64;
    // SAFETY: Clearing sstatus.SIE only masks supervisor interrupts, which is
    // always safe.
    unsafe {
        asm!(
            "csrrc {previous}, sstatus, {mask}",
            previous = out(reg) previous,
            mask = in(reg) SSTATUS_SIE,
            options(nostack),
        );
    }

    // SAFETY: Interrupts are masked on this core until we restore sstatus.SIE
    // below, after the token has been dropped.
    let token = unsafe { ExceptionFree::new() };
    let result = f(token);

    if previous & SSTATUS_SIE != 0 {
        // SAFETY: Re-enabling supervisor interrupts that were enabled when we
        // were called is always safe.
        unsafe {
            asm!(
                "csrs sstatus, {mask}",
                mask = in(reg) SSTATUS_SIE,
                options(nostack),
            );
        }
    }

    result
}

/// Returns the linear index of the current core.
///
/// Early boot code stores the index in `tp` before any of this crate runs, and
/// nothing in the secure kernel writes to it afterwards.
pub fn core_index() -> usize {
    let tp: usize;
    // SAFETY: Reading the thread pointer register has no side effects.
    unsafe {
        asm!("mv {tp}, tp", tp = out(reg) tp, options(nomem, nostack));
    }
    tp
}

/// Swaps zero into the seed CSR, returning its previous value.
///
/// The scalar cryptography extension requires reads of the seed CSR to use a
/// read-write instruction so that consumed entropy is regenerated.
pub fn swap_seed_csr() -> u64 {
    let seed: u64;
    // SAFETY: The seed CSR holds no configuration state, so swapping zero into
    // it only consumes entropy.
    unsafe {
        asm!("csrrw {seed}, 0x015, zero", seed = out(reg) seed, options(nostack));
    }
    seed
}
