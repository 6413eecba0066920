// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Entropy sources used to mint resume tokens.

use core::fmt::{self, Display, Formatter};

/// Errors returned by an entropy source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntropyError {
    /// The source did not produce entropy within its retry bound.
    Exhausted,
    /// The source reported an unrecoverable hardware fault.
    Dead,
}

impl Display for EntropyError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Self::Exhausted => "entropy source produced nothing within the retry bound",
            Self::Dead => "entropy source reported a hardware fault",
        };
        f.write_str(s)
    }
}

/// A source of hardware (or, in tests, deterministic) randomness.
pub trait EntropySource {
    /// Probes for the source once at boot.
    ///
    /// Panics if the source is absent, since resume tokens cannot be minted
    /// safely without it.
    fn init() {}

    /// Returns 64 bits of entropy.
    fn random_u64() -> Result<u64, EntropyError>;
}

#[cfg(all(target_arch = "riscv64", not(test)))]
mod zkr {
    use super::{EntropyError, EntropySource};
    use crate::riscv64;

    /// Status field of the seed CSR.
    const OPST_MASK: u64 = 0xc000_0000;
    /// Entropy available, low 16 bits are valid.
    const OPST_ES16: u64 = 0x8000_0000;
    /// Unrecoverable self-test failure.
    const OPST_DEAD: u64 = 0xc000_0000;

    /// How many polls to attempt before giving up on one sample.
    const MAX_POLLS: u32 = 100;

    /// The number of 16-bit samples in one 64-bit output.
    const SAMPLES: u32 = 4;

    /// Entropy source backed by the scalar cryptography seed CSR.
    pub struct ZkrSeed;

    impl ZkrSeed {
        fn sample16() -> Result<u64, EntropyError> {
            for _ in 0..MAX_POLLS {
                let seed = riscv64::swap_seed_csr();
                match seed & OPST_MASK {
                    OPST_ES16 => return Ok(seed & 0xffff),
                    OPST_DEAD => return Err(EntropyError::Dead),
                    // BIST or WAIT, poll again.
                    _ => {}
                }
            }
            Err(EntropyError::Exhausted)
        }
    }

    impl EntropySource for ZkrSeed {
        fn init() {
            if let Err(e) = Self::random_u64() {
                panic!("seed CSR unusable at boot: {e}");
            }
        }

        fn random_u64() -> Result<u64, EntropyError> {
            let mut value = 0;
            for _ in 0..SAMPLES {
                value = (value << 16) | Self::sample16()?;
            }
            Ok(value)
        }
    }
}

#[cfg(all(target_arch = "riscv64", not(test)))]
pub use zkr::ZkrSeed;
