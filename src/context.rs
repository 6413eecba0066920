// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Saved execution state of code running on either side of the world boundary.

use bitflags::bitflags;

/// The privilege domains a core can execute in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum World {
    /// The secure kernel and its threads.
    Secure,
    /// The untrusted domain making calls into the secure kernel.
    Untrusted,
}

bitflags! {
    /// Hart status bits preserved across a world switch.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct HartStatus: u64 {
        /// Supervisor interrupt enable.
        const SIE = 1 << 1;
        /// Interrupt enable state before the last trap.
        const SPIE = 1 << 5;
        /// Privilege level before the last trap.
        const SPP = 1 << 8;
        /// Permit supervisor access to user memory.
        const SUM = 1 << 18;
    }
}

/// Saved general-purpose register state of a secure thread.
///
/// Covers `x1` to `x31` (`x0` is hardwired to zero), the program counter and
/// the preserved status bits.
#[derive(Clone, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct RegisterFile {
    /// `x1` to `x31`, so `registers[n]` holds `x(n + 1)`.
    pub registers: [u64; Self::COUNT],
    /// The address at which to enter or re-enter the thread.
    pub pc: u64,
    /// Status bits restored when the thread next runs.
    pub status: HartStatus,
}

impl RegisterFile {
    /// The number of saved general-purpose registers.
    pub const COUNT: usize = 31;

    /// Index of `a0` (`x10`) within [`Self::registers`].
    const A0_INDEX: usize = 9;

    /// The number of argument registers available to boundary calls.
    pub const MAX_ARGS: usize = 8;

    /// A register file with everything zeroed.
    pub const EMPTY: Self = Self {
        registers: [0; Self::COUNT],
        pc: 0,
        status: HartStatus::empty(),
    };

    /// Loads call arguments into the argument registers, starting at `a0`.
    ///
    /// Panics if more than [`Self::MAX_ARGS`] arguments are passed.
    pub fn write_args(&mut self, args: &[u64]) {
        assert!(args.len() <= Self::MAX_ARGS);
        self.registers[Self::A0_INDEX..Self::A0_INDEX + args.len()].copy_from_slice(args);
    }

    /// Reads the result registers `a0` to `a3`.
    pub fn return_values(&self) -> [u64; 4] {
        let mut values = [0; 4];
        values.copy_from_slice(&self.registers[Self::A0_INDEX..Self::A0_INDEX + 4]);
        values
    }
}
