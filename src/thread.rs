// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The bounded pool of suspendable secure threads.
//!
//! A thread is acquired when a fresh call enters the secure world, suspended
//! when it yields for a foreign interrupt, and released when its call
//! completes. A suspended thread can only be reactivated with the single-use
//! resume token minted at suspension, so a caller cannot forge its way into
//! someone else's call.

use crate::context::RegisterFile;
use crate::entropy::EntropySource;
use crate::platform::{CoresImpl, EntropyImpl, Platform, PlatformImpl, exception_free};
use core::fmt::{self, Debug, Display, Formatter};
use percore::Cores;
use spin::mutex::SpinMutex;

/// Identifier of a secure thread, an index into the pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThreadId(usize);

impl ThreadId {
    /// Reconstructs an id from an untrusted word, rejecting out-of-range
    /// values.
    pub fn from_raw(raw: u64) -> Option<Self> {
        let index = usize::try_from(raw).ok()?;
        if index < PlatformImpl::THREAD_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// The id as a register word.
    pub fn raw(self) -> u64 {
        self.0 as u64
    }

    const fn index(self) -> usize {
        self.0
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one pool slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Not in use.
    Free,
    /// Executing a call on its owning core.
    Active,
    /// Yielded, waiting for a matching resume token.
    Suspended,
}

/// Number of low token bits taken by the anti-reuse serial.
const TOKEN_SERIAL_BITS: u32 = 16;

/// Single-use authorisation to reactivate a suspended thread.
///
/// The low 16 bits hold a per-thread serial so that two tokens minted for the
/// same thread never compare equal; the rest is hardware entropy so that
/// tokens cannot be predicted.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct ResumeToken(u64);

impl ResumeToken {
    /// Reconstructs a token from an untrusted word.
    ///
    /// This performs no validation; the pool compares tokens on resume.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The token as a register word.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// Tokens are capabilities, keep their value out of logs.
impl Debug for ResumeToken {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("ResumeToken(..)")
    }
}

/// Errors returned by pool operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadError {
    /// Every slot is busy; returned by [`ThreadPool::acquire`].
    Exhausted,
    /// The token did not match, or the thread is not suspended; returned by
    /// [`ThreadPool::resume`].
    InvalidToken,
}

impl Display for ThreadError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("no free secure thread"),
            Self::InvalidToken => f.write_str("resume token does not match"),
        }
    }
}

struct Thread {
    state: ThreadState,
    /// The core currently executing this thread, if any.
    owner: Option<usize>,
    token: ResumeToken,
    serial: u16,
    regs: RegisterFile,
}

impl Thread {
    const FREE: Self = Self {
        state: ThreadState::Free,
        owner: None,
        token: ResumeToken(0),
        serial: 0,
        regs: RegisterFile::EMPTY,
    };
}

/// The fixed-size pool of secure threads.
///
/// All operations take the pool lock with exceptions masked, so a trap
/// handler can never observe a thread between two halves of a transition.
pub struct ThreadPool {
    threads: SpinMutex<[Thread; PlatformImpl::THREAD_COUNT]>,
}

impl ThreadPool {
    /// Creates a pool with every thread free.
    pub const fn new() -> Self {
        Self {
            threads: SpinMutex::new([const { Thread::FREE }; PlatformImpl::THREAD_COUNT]),
        }
    }

    /// Takes a free thread for a fresh call on the current core.
    ///
    /// The thread's register file starts zeroed.
    pub fn acquire(&self) -> Result<ThreadId, ThreadError> {
        exception_free(|_| {
            let mut threads = self.threads.lock();
            let Some(index) = threads
                .iter()
                .position(|thread| thread.state == ThreadState::Free)
            else {
                return Err(ThreadError::Exhausted);
            };
            let thread = &mut threads[index];
            thread.state = ThreadState::Active;
            thread.owner = Some(CoresImpl::core_index());
            thread.regs = RegisterFile::EMPTY;
            Ok(ThreadId(index))
        })
    }

    /// Suspends an active thread, saving its registers and minting a fresh
    /// resume token.
    ///
    /// Panics if the thread is not active on the current core; suspending
    /// someone else's thread is a bug in the dispatcher, not a caller error.
    pub fn suspend(&self, id: ThreadId, regs: &RegisterFile) -> ResumeToken {
        exception_free(|_| {
            let mut threads = self.threads.lock();
            let thread = &mut threads[id.index()];
            assert_eq!(
                thread.state,
                ThreadState::Active,
                "suspend of thread {id} in state {:?}",
                thread.state
            );
            assert_eq!(
                thread.owner,
                Some(CoresImpl::core_index()),
                "suspend of thread {id} owned by another core"
            );

            thread.regs = regs.clone();
            thread.serial = thread.serial.wrapping_add(1);
            let token = mint_token(thread.serial);
            thread.token = token;
            thread.state = ThreadState::Suspended;
            thread.owner = None;
            token
        })
    }

    /// Reactivates a suspended thread on the current core, if the token
    /// matches the one minted at suspension.
    ///
    /// On a mismatch nothing changes; the thread stays suspended and its
    /// token remains valid.
    pub fn resume(&self, id: ThreadId, token: ResumeToken) -> Result<(), ThreadError> {
        exception_free(|_| {
            let mut threads = self.threads.lock();
            let thread = &mut threads[id.index()];
            if thread.state != ThreadState::Suspended || thread.token != token {
                return Err(ThreadError::InvalidToken);
            }
            thread.state = ThreadState::Active;
            thread.owner = Some(CoresImpl::core_index());
            Ok(())
        })
    }

    /// Returns a finished thread to the pool.
    ///
    /// Panics if the thread is not active on the current core.
    pub fn release(&self, id: ThreadId) {
        exception_free(|_| {
            let mut threads = self.threads.lock();
            let thread = &mut threads[id.index()];
            assert_eq!(
                thread.state,
                ThreadState::Active,
                "release of thread {id} in state {:?}",
                thread.state
            );
            assert_eq!(
                thread.owner,
                Some(CoresImpl::core_index()),
                "release of thread {id} owned by another core"
            );
            thread.state = ThreadState::Free;
            thread.owner = None;
        })
    }

    /// Returns a copy of the saved register file of a thread active on the
    /// current core.
    ///
    /// Panics under the same conditions as [`Self::release`].
    pub fn registers(&self, id: ThreadId) -> RegisterFile {
        exception_free(|_| {
            let threads = self.threads.lock();
            let thread = &threads[id.index()];
            assert_eq!(
                thread.state,
                ThreadState::Active,
                "registers of thread {id} in state {:?}",
                thread.state
            );
            assert_eq!(
                thread.owner,
                Some(CoresImpl::core_index()),
                "registers of thread {id} owned by another core"
            );
            thread.regs.clone()
        })
    }

    /// The lifecycle state of the given thread.
    pub fn state(&self, id: ThreadId) -> ThreadState {
        exception_free(|_| self.threads.lock()[id.index()].state)
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

fn mint_token(serial: u16) -> ResumeToken {
    let entropy = match EntropyImpl::random_u64() {
        Ok(entropy) => entropy,
        // Without entropy a token would be guessable, which is worse than
        // stopping.
        Err(e) => panic!("entropy source failed while minting a resume token: {e}"),
    };
    ResumeToken((entropy << TOKEN_SERIAL_BITS) | u64::from(serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::set_core_index;

    #[test]
    fn acquire_gives_distinct_active_threads() {
        let pool = ThreadPool::new();
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        assert_ne!(first, second);
        assert_eq!(pool.state(first), ThreadState::Active);
        assert_eq!(pool.state(second), ThreadState::Active);
    }

    #[test]
    fn pool_exhaustion() {
        let pool = ThreadPool::new();
        for _ in 0..PlatformImpl::THREAD_COUNT {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.acquire(), Err(ThreadError::Exhausted));
    }

    #[test]
    fn release_makes_thread_reusable() {
        let pool = ThreadPool::new();
        for _ in 0..PlatformImpl::THREAD_COUNT {
            pool.acquire().unwrap();
        }
        let id = ThreadId(0);
        pool.release(id);
        assert_eq!(pool.state(id), ThreadState::Free);
        assert_eq!(pool.acquire(), Ok(id));
    }

    #[test]
    fn acquired_registers_start_zeroed() {
        let pool = ThreadPool::new();
        let id = pool.acquire().unwrap();

        let mut regs = RegisterFile::EMPTY;
        regs.write_args(&[1, 2, 3]);
        let token = pool.suspend(id, &regs);
        pool.resume(id, token).unwrap();
        pool.release(id);

        // Nothing from the previous call leaks into the next one.
        assert_eq!(pool.acquire(), Ok(id));
        assert_eq!(pool.registers(id), RegisterFile::EMPTY);
    }

    #[test]
    fn suspend_and_resume_round_trip() {
        let pool = ThreadPool::new();
        let id = pool.acquire().unwrap();

        let mut regs = RegisterFile::EMPTY;
        regs.write_args(&[0xdead, 0xbeef]);
        regs.pc = 0x8000_0000;
        let token = pool.suspend(id, &regs);
        assert_eq!(pool.state(id), ThreadState::Suspended);

        pool.resume(id, token).unwrap();
        assert_eq!(pool.state(id), ThreadState::Active);
        assert_eq!(pool.registers(id), regs);
    }

    #[test]
    fn stale_token_is_rejected_without_mutation() {
        let pool = ThreadPool::new();
        let id = pool.acquire().unwrap();

        let stale = pool.suspend(id, &RegisterFile::EMPTY);
        pool.resume(id, stale).unwrap();
        let fresh = pool.suspend(id, &RegisterFile::EMPTY);
        assert_ne!(stale, fresh);

        assert_eq!(pool.resume(id, stale), Err(ThreadError::InvalidToken));
        assert_eq!(pool.state(id), ThreadState::Suspended);

        // The real token still works after the failed attempt.
        pool.resume(id, fresh).unwrap();
    }

    #[test]
    fn resume_of_free_thread_is_rejected() {
        let pool = ThreadPool::new();
        assert_eq!(
            pool.resume(ThreadId(0), ResumeToken::from_raw(0)),
            Err(ThreadError::InvalidToken)
        );
        assert_eq!(pool.state(ThreadId(0)), ThreadState::Free);
    }

    #[test]
    fn tokens_are_never_repeated() {
        let pool = ThreadPool::new();
        let id = pool.acquire().unwrap();

        let mut tokens = Vec::new();
        for _ in 0..10 {
            let token = pool.suspend(id, &RegisterFile::EMPTY);
            pool.resume(id, token).unwrap();
            tokens.push(token.raw());
        }
        tokens.sort_unstable();
        tokens.dedup();
        assert_eq!(tokens.len(), 10);
    }

    #[test]
    fn resumed_thread_moves_to_resuming_core() {
        let pool = ThreadPool::new();
        set_core_index(0);
        let id = pool.acquire().unwrap();
        let token = pool.suspend(id, &RegisterFile::EMPTY);

        set_core_index(2);
        pool.resume(id, token).unwrap();
        // Now owned by core 2, so core 2 may release it.
        pool.release(id);
    }

    #[test]
    #[should_panic(expected = "owned by another core")]
    fn suspend_from_wrong_core() {
        let pool = ThreadPool::new();
        set_core_index(0);
        let id = pool.acquire().unwrap();

        set_core_index(1);
        pool.suspend(id, &RegisterFile::EMPTY);
    }

    #[test]
    #[should_panic(expected = "suspend of thread")]
    fn suspend_of_free_thread() {
        let pool = ThreadPool::new();
        pool.suspend(ThreadId(0), &RegisterFile::EMPTY);
    }

    #[test]
    #[should_panic(expected = "release of thread")]
    fn release_of_suspended_thread() {
        let pool = ThreadPool::new();
        let id = pool.acquire().unwrap();
        pool.suspend(id, &RegisterFile::EMPTY);
        pool.release(id);
    }

    #[test]
    #[should_panic(expected = "registers of thread")]
    fn registers_of_free_thread() {
        let pool = ThreadPool::new();
        pool.registers(ThreadId(0));
    }

    #[test]
    fn thread_id_bounds() {
        assert!(ThreadId::from_raw(0).is_some());
        assert!(ThreadId::from_raw(PlatformImpl::THREAD_COUNT as u64).is_none());
        assert!(ThreadId::from_raw(u64::MAX).is_none());
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = ResumeToken::from_raw(0x1234_5678);
        assert_eq!(format!("{token:?}"), "ResumeToken(..)");
    }
}
