// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Types for the supervisor call boundary to the firmware layer below.

use core::fmt::{self, Display, Formatter};
use num_enum::TryFromPrimitive;

/// Extension id of the base extension.
pub const EXT_BASE: u32 = 0x10;
/// Extension id of the message proxy extension.
pub const EXT_MPXY: u32 = 0x4D50_5859;
/// Extension id of the debug console extension.
pub const EXT_DBCN: u32 = 0x4442_434E;

/// Function id to probe for the presence of another extension.
pub const BASE_PROBE_EXTENSION: u32 = 3;

/// Function id to register the calling hart's shared-memory page.
pub const MPXY_SET_SHMEM: u32 = 0;
/// Function id to send a message and spin until its response arrives.
pub const MPXY_SEND_MESSAGE_WITH_RESPONSE: u32 = 4;

/// Function id to write one byte to the debug console.
pub const DBCN_CONSOLE_WRITE_BYTE: u32 = 2;

/// Error code of a successful call.
pub const SUCCESS: i64 = 0;

/// The register pair returned by every call to the firmware layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SbiRet {
    /// Status code, 0 on success and negative on failure.
    pub error: i64,
    /// Call-specific result value, only meaningful when `error` is 0.
    pub value: u64,
}

impl SbiRet {
    /// Returns a successful result carrying `value`.
    pub const fn success(value: u64) -> Self {
        Self {
            error: SUCCESS,
            value,
        }
    }

    /// Returns a failed result carrying the given error code.
    pub const fn failure(error: i64) -> Self {
        Self { error, value: 0 }
    }

    /// Whether the call succeeded.
    pub const fn is_ok(&self) -> bool {
        self.error == SUCCESS
    }
}

/// Error codes defined by the calling convention of the firmware layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(i64)]
pub enum SbiError {
    /// The call failed for an unspecified reason.
    Failed = -1,
    /// The extension or function is not supported.
    NotSupported = -2,
    /// An argument was invalid.
    InvalidParameter = -3,
    /// The caller is not allowed to make this call.
    Denied = -4,
    /// An address argument was invalid.
    InvalidAddress = -5,
    /// The resource is already available.
    AlreadyAvailable = -6,
    /// The resource was already started.
    AlreadyStarted = -7,
    /// The resource was already stopped.
    AlreadyStopped = -8,
}

impl Display for SbiError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Self::Failed => "call failed",
            Self::NotSupported => "not supported",
            Self::InvalidParameter => "invalid parameter",
            Self::Denied => "denied",
            Self::InvalidAddress => "invalid address",
            Self::AlreadyAvailable => "already available",
            Self::AlreadyStarted => "already started",
            Self::AlreadyStopped => "already stopped",
        };
        f.write_str(s)
    }
}

/// Wraps a raw error code for display, naming standard codes.
pub struct ErrorCode(pub i64);

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match SbiError::try_from(self.0) {
            Ok(error) => Display::fmt(&error, f),
            Err(_) => write!(f, "unknown error {}", self.0),
        }
    }
}

/// The synchronous register-based call into the firmware layer.
///
/// Callers pass an extension id, a function id and up to six argument
/// registers, and block until the callee returns an error and value pair. On
/// hardware this is a single trap instruction; tests substitute a scripted
/// fake.
pub trait CallPrimitive {
    /// Makes one call and returns its result registers.
    fn call(&self, extension: u32, function: u32, args: [u64; 6]) -> SbiRet;
}

/// Asks the firmware layer whether it implements the given extension.
pub fn probe_extension(call: &impl CallPrimitive, extension: u32) -> bool {
    let ret = call.call(
        EXT_BASE,
        BASE_PROBE_EXTENSION,
        [extension.into(), 0, 0, 0, 0, 0],
    );
    ret.is_ok() && ret.value != 0
}

#[cfg(all(target_arch = "riscv64", not(test)))]
mod ecall {
    use super::{CallPrimitive, SbiRet};
    use core::arch::asm;

    /// [`CallPrimitive`] implemented with the `ecall` trap instruction.
    pub struct Ecall;

    impl CallPrimitive for Ecall {
        fn call(&self, extension: u32, function: u32, args: [u64; 6]) -> SbiRet {
            let error: i64;
            let value: u64;
            // SAFETY: The firmware layer follows the standard calling
            // convention: it clobbers only a0 and a1 and returns to the
            // instruction after the trap.
            unsafe {
                asm!(
                    "ecall",
                    inout("a0") args[0] => error,
                    inout("a1") args[1] => value,
                    in("a2") args[2],
                    in("a3") args[3],
                    in("a4") args[4],
                    in("a5") args[5],
                    in("a6") function,
                    in("a7") extension,
                    options(nostack),
                );
            }
            SbiRet { error, value }
        }
    }
}

#[cfg(all(target_arch = "riscv64", not(test)))]
pub use ecall::Ecall;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeCall;

    #[test]
    fn error_codes_decode() {
        assert_eq!(SbiError::try_from(-2).unwrap(), SbiError::NotSupported);
        assert_eq!(SbiError::try_from(-4).unwrap(), SbiError::Denied);
        assert!(SbiError::try_from(0).is_err());
        assert!(SbiError::try_from(1).is_err());
    }

    #[test]
    fn error_code_display() {
        assert_eq!(format!("{}", ErrorCode(-2)), "not supported");
        assert_eq!(format!("{}", ErrorCode(-99)), "unknown error -99");
    }

    #[test]
    fn successful_ret() {
        let ret = SbiRet::success(42);
        assert!(ret.is_ok());
        assert_eq!(ret.value, 42);
        assert!(!SbiRet::failure(-1).is_ok());
    }

    #[test]
    fn probe_present_extension() {
        let call = FakeCall::new();
        assert!(probe_extension(&call, EXT_MPXY));
    }

    #[test]
    fn probe_missing_extension() {
        let call = FakeCall::new();
        call.set_probe_result(false);
        assert!(!probe_extension(&call, EXT_MPXY));
    }
}
