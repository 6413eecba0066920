// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Call dispatch and thread context engine for the secure world of a RISC-V
//! TEE.
//!
//! The untrusted domain reaches the secure kernel through a message proxy in
//! the firmware layer below both worlds. This crate owns everything on the
//! secure side of that boundary: the per-core shared-memory channels used to
//! carry call payloads, the bounded pool of suspendable secure threads, the
//! context switch engine that moves a core between worlds, and the marshaller
//! that encodes results back to the caller.
//!
//! All code is written to run both on bare-metal `riscv64` and, with fake
//! platform hooks, as part of the host test suite.

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod context;
mod debug;
pub mod discovery;
pub mod dispatch;
pub mod entropy;
pub mod logger;
pub mod marshal;
pub mod pagepool;
pub mod platform;
#[cfg(all(target_arch = "riscv64", not(test)))]
mod riscv64;
pub mod sbi;
pub mod thread;
