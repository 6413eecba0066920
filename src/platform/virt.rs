// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The QEMU virt reference platform.

use super::Platform;
use crate::entropy::{EntropySource, ZkrSeed};
use crate::logger::{self, LockedWriter};
use crate::pagepool::ChannelPage;
use crate::riscv64;
use crate::sbi::{self, CallPrimitive, Ecall};
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};
use log::debug;

/// A console which writes bytes through the debug console extension.
pub struct SbiConsole;

impl Write for SbiConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            Ecall.call(
                sbi::EXT_DBCN,
                sbi::DBCN_CONSOLE_WRITE_BYTE,
                [byte.into(), 0, 0, 0, 0, 0],
            );
        }
        Ok(())
    }
}

/// The QEMU virt platform.
pub struct Virt;

impl Platform for Virt {
    const CORE_COUNT: usize = 4;
    const THREAD_COUNT: usize = 8;

    type LogSinkImpl = LockedWriter<SbiConsole>;
    type EntropyImpl = ZkrSeed;

    fn init() {
        // Secondary cores find the logger already set.
        let _ = logger::init(LockedWriter::new(SbiConsole));
        ZkrSeed::init();
    }

    fn virt_to_phys(va: usize) -> usize {
        // The secure image is identity mapped.
        va
    }

    fn handle_native_interrupt() {
        // Interrupt controller claim and completion belong to the secure
        // kernel proper, which installs its own trap vector before any thread
        // runs.
        debug!("native interrupt on core {}", riscv64::core_index());
    }
}

/// Takes the statically allocated channel pages.
///
/// Panics if called more than once.
pub fn take_channel_pages() -> &'static mut [ChannelPage] {
    static TAKEN: AtomicBool = AtomicBool::new(false);
    static mut PAGES: [ChannelPage; Virt::CORE_COUNT] =
        [const { ChannelPage::new() }; Virt::CORE_COUNT];

    assert!(
        !TAKEN.swap(true, Ordering::Acquire),
        "channel pages already taken"
    );
    // SAFETY: The flag above guarantees that a reference to the pages is only
    // created once.
    unsafe { &mut *&raw mut PAGES }
}
