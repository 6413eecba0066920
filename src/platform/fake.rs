// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A fake platform for host builds and unit tests.

use super::Platform;
use crate::entropy::{EntropyError, EntropySource};
use crate::logger;
#[cfg(not(test))]
use crate::logger::{LockedWriter, MemoryWriter};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use percore::ExceptionFree;

/// The platform used on hosts, where none of the real hardware exists.
pub struct FakePlatform;

impl Platform for FakePlatform {
    const CORE_COUNT: usize = 4;
    const THREAD_COUNT: usize = 3;

    #[cfg(test)]
    type LogSinkImpl = StdOutSink;
    #[cfg(not(test))]
    type LogSinkImpl = LockedWriter<MemoryWriter<4096>>;

    type EntropyImpl = FakeEntropy;

    fn init() {
        // Tests running in parallel race to set the logger; later callers
        // find it already initialised.
        #[cfg(test)]
        let _ = logger::init(StdOutSink);
        #[cfg(not(test))]
        let _ = logger::init(LockedWriter::new(MemoryWriter::new()));
    }

    fn virt_to_phys(va: usize) -> usize {
        va
    }

    fn handle_native_interrupt() {
        NATIVE_INTERRUPTS.fetch_add(1, Ordering::Relaxed);
    }
}

static NATIVE_INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

/// The number of native interrupts the fake platform has handled.
#[cfg(test)]
pub fn native_interrupt_count() -> usize {
    NATIVE_INTERRUPTS.load(Ordering::Relaxed)
}

#[cfg(test)]
std::thread_local! {
    static CORE_INDEX: core::cell::Cell<usize> = const { core::cell::Cell::new(0) };
}

/// Returns the fake index of the current core.
///
/// Each test thread acts as its own core, starting at index 0.
#[cfg(test)]
pub fn core_index() -> usize {
    CORE_INDEX.with(|index| index.get())
}

/// Makes subsequent calls on this test thread behave as the given core.
#[cfg(test)]
pub fn set_core_index(index: usize) {
    assert!(index < FakePlatform::CORE_COUNT);
    CORE_INDEX.with(|cell| cell.set(index));
}

/// Returns the fake index of the current core.
#[cfg(not(test))]
pub fn core_index() -> usize {
    0
}

/// Runs the given function, pretending that exceptions are masked.
pub fn exception_free<T>(f: impl FnOnce(ExceptionFree) -> T) -> T {
    // SAFETY: There are no exceptions on the fake platform, and each test
    // thread acts as an independent core with its own state.
    let token = unsafe { ExceptionFree::new() };
    f(token)
}

/// A log sink which writes to standard output.
#[cfg(test)]
pub struct StdOutSink;

#[cfg(test)]
impl logger::LogSink for StdOutSink {
    fn write_fmt(&self, args: core::fmt::Arguments) {
        print!("{args}");
    }
}

static RNG_STATE: AtomicU64 = AtomicU64::new(0x853c_49e6_748f_ea9b);

/// A deterministic xorshift generator standing in for the hardware source.
pub struct FakeEntropy;

impl EntropySource for FakeEntropy {
    fn random_u64() -> Result<u64, EntropyError> {
        let mut x = RNG_STATE.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        RNG_STATE.store(x, Ordering::Relaxed);
        Ok(x)
    }
}

#[cfg(test)]
pub use test_helpers::{FakeCall, leak_pages};

#[cfg(test)]
mod test_helpers {
    use crate::pagepool::{ChannelPage, PAGE_SIZE};
    use crate::sbi::{self, CallPrimitive, SbiRet};
    use spin::mutex::SpinMutex;

    /// Leaks a run of zeroed pages to back a test page pool.
    pub fn leak_pages(count: usize) -> &'static mut [ChannelPage] {
        let pages: Vec<ChannelPage> = (0..count).map(|_| ChannelPage::new()).collect();
        Box::leak(pages.into_boxed_slice())
    }

    /// A scriptable stand-in for the call primitive.
    ///
    /// By default it accepts shared-memory registration and echoes sent
    /// messages back as their own response. Tests can script failures or
    /// substitute response bytes.
    pub struct FakeCall {
        state: SpinMutex<FakeCallState>,
    }

    struct FakeCallState {
        probe_result: bool,
        shmem: Option<usize>,
        set_shmem_error: Option<i64>,
        send_error: Option<i64>,
        response: Option<Vec<u8>>,
        claimed_response_len: Option<u64>,
        calls: Vec<(u32, u32, [u64; 6])>,
    }

    impl FakeCall {
        /// Creates a fake which accepts registration and echoes messages.
        pub fn new() -> Self {
            Self {
                state: SpinMutex::new(FakeCallState {
                    probe_result: true,
                    shmem: None,
                    set_shmem_error: None,
                    send_error: None,
                    response: None,
                    claimed_response_len: None,
                    calls: Vec::new(),
                }),
            }
        }

        /// Sets whether extension probes report the extension as present.
        pub fn set_probe_result(&self, present: bool) {
            self.state.lock().probe_result = present;
        }

        /// Makes shared-memory registration fail with the given code.
        pub fn reject_shmem(&self, error: i64) {
            self.state.lock().set_shmem_error = Some(error);
        }

        /// Makes message sends fail with the given code.
        pub fn fail_send(&self, error: i64) {
            self.state.lock().send_error = Some(error);
        }

        /// Responds to future messages with the given bytes instead of an
        /// echo.
        pub fn set_response(&self, bytes: &[u8]) {
            self.state.lock().response = Some(bytes.to_vec());
        }

        /// Reports the given response length regardless of the real one.
        pub fn claim_response_len(&self, len: u64) {
            self.state.lock().claimed_response_len = Some(len);
        }

        /// The registered shared-memory address, if any.
        pub fn shmem(&self) -> Option<usize> {
            self.state.lock().shmem
        }

        /// Every call made so far, as (extension, function, args) tuples.
        pub fn calls(&self) -> Vec<(u32, u32, [u64; 6])> {
            self.state.lock().calls.clone()
        }
    }

    impl CallPrimitive for FakeCall {
        fn call(&self, extension: u32, function: u32, args: [u64; 6]) -> SbiRet {
            let mut state = self.state.lock();
            state.calls.push((extension, function, args));
            match (extension, function) {
                (sbi::EXT_BASE, sbi::BASE_PROBE_EXTENSION) => {
                    SbiRet::success(state.probe_result.into())
                }
                (sbi::EXT_MPXY, sbi::MPXY_SET_SHMEM) => {
                    if let Some(error) = state.set_shmem_error {
                        return SbiRet::failure(error);
                    }
                    state.shmem = Some(args[1] as usize);
                    SbiRet::success(0)
                }
                (sbi::EXT_MPXY, sbi::MPXY_SEND_MESSAGE_WITH_RESPONSE) => {
                    if let Some(error) = state.send_error {
                        return SbiRet::failure(error);
                    }
                    let shmem = state
                        .shmem
                        .expect("message sent before shared memory was registered");
                    let mut response_len = args[2];
                    if let Some(response) = &state.response {
                        assert!(response.len() <= PAGE_SIZE);
                        // SAFETY: shmem is the identity-mapped address of a
                        // leaked channel page registered by the test, and the
                        // caller holds no reference to it during the call.
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                response.as_ptr(),
                                shmem as *mut u8,
                                response.len(),
                            );
                        }
                        response_len = response.len() as u64;
                    }
                    if let Some(claimed) = state.claimed_response_len {
                        response_len = claimed;
                    }
                    SbiRet::success(response_len)
                }
                _ => SbiRet::failure(-2),
            }
        }
    }
}
