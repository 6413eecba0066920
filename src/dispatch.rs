// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Entry handling and world switching.
//!
//! Every entry from the untrusted domain is either a fresh call, which takes
//! a thread from the pool, or a resume of a previously yielded call, which
//! must present the matching resume token. The dispatcher runs the thread
//! until it completes or an interrupt forces it back out, then reports the
//! outcome through the marshaller.

use crate::channel::{ChannelError, ChannelRegistry};
use crate::context::{RegisterFile, World};
use crate::marshal::{self, COMPLETION_WORDS, CallError, CompletionPayload};
use crate::pagepool::PagePool;
use crate::platform::{Platform, PlatformImpl};
use crate::sbi::CallPrimitive;
use crate::thread::{ResumeToken, ThreadId, ThreadPool};
use core::fmt::{self, Display, Formatter};
use log::{debug, trace, warn};

/// The number of register words carried by one entry.
pub const ENTRY_WORDS: usize = COMPLETION_WORDS;

/// Function code of a fresh yielding call.
pub const FUNC_STD_CALL: u64 = 0;
/// Function code of a resume of a yielded call.
pub const FUNC_RESUME: u64 = 1;

/// Status word of a completed call.
pub const RETURN_OK: u64 = 0;
/// Status word of a yielded call; the thread id and resume token follow.
pub const RETURN_YIELD: u64 = 1;
/// Status word when no secure thread is free.
pub const RETURN_BUSY: u64 = 2;
/// Status word of a malformed entry.
pub const RETURN_BAD_ENTRY: u64 = 3;

/// A decoded entry from the untrusted domain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entry {
    /// A fresh call carrying up to four arguments.
    StdCall {
        /// Arguments passed through to the secure thread's `a0` to `a3`.
        args: [u64; ENTRY_WORDS - 1],
    },
    /// Reactivation of a yielded call.
    Resume {
        /// The thread to reactivate.
        thread: ThreadId,
        /// The token minted when the thread yielded.
        token: ResumeToken,
    },
}

impl Entry {
    /// Decodes entry register words.
    ///
    /// The first word selects the function; a fresh call passes its arguments
    /// in the remaining words, a resume passes the thread id and token.
    pub fn decode(words: &[u64; ENTRY_WORDS]) -> Result<Self, DispatchError> {
        match words[0] {
            FUNC_STD_CALL => {
                let mut args = [0; ENTRY_WORDS - 1];
                args.copy_from_slice(&words[1..]);
                Ok(Self::StdCall { args })
            }
            FUNC_RESUME => {
                let thread = ThreadId::from_raw(words[1]).ok_or_else(|| {
                    warn!("Resume of out-of-range thread {}", words[1]);
                    DispatchError::BadEntry
                })?;
                Ok(Self::Resume {
                    thread,
                    token: ResumeToken::from_raw(words[2]),
                })
            }
            function => {
                warn!("Entry with unknown function {function:#x}");
                Err(DispatchError::BadEntry)
            }
        }
    }
}

/// Why a run of secure code handed control back to the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunResult {
    /// The call finished with the given result words.
    Completed([u64; 4]),
    /// An interrupt for the untrusted domain is pending; yield to it.
    ForeignInterrupt,
    /// An interrupt for the secure domain is pending; handle it and re-enter.
    NativeInterrupt,
}

/// The architecture seam which actually executes a secure thread.
///
/// Implementations load the register file onto the core, transfer control to
/// the secure kernel and give back the (updated) register file when the run
/// stops.
pub trait SecureRun {
    /// Runs until the thread completes its call or an interrupt arrives.
    fn run(&self, regs: &mut RegisterFile) -> RunResult;
}

/// What an entry produced, before encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The call ran to completion.
    Completed {
        /// Result words from the thread's `a0` to `a3`.
        ret: [u64; 4],
    },
    /// The call yielded; present the token to continue it.
    Yielded {
        /// The suspended thread.
        thread: ThreadId,
        /// The single-use token required to resume it.
        token: ResumeToken,
    },
}

/// Recoverable errors reported to the untrusted caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchError {
    /// Every secure thread is busy; try again later.
    Busy,
    /// The entry words were malformed.
    BadEntry,
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("no free secure thread"),
            Self::BadEntry => f.write_str("malformed entry"),
        }
    }
}

/// The per-system dispatch engine.
///
/// Owns the channel registry and thread pool, and is parameterised over the
/// call primitive and the architecture seam so that tests can script both.
pub struct Dispatcher<C: CallPrimitive, R: SecureRun> {
    registry: ChannelRegistry,
    pool: ThreadPool,
    channel_id: u32,
    call: C,
    runner: R,
}

impl<C: CallPrimitive, R: SecureRun> Dispatcher<C, R> {
    /// Creates a dispatcher for the given negotiated channel id.
    pub const fn new(channel_id: u32, call: C, runner: R) -> Self {
        Self {
            registry: ChannelRegistry::new(),
            pool: ThreadPool::new(),
            channel_id,
            call,
            runner,
        }
    }

    /// Negotiates the current core's transport channel.
    ///
    /// Must be called on each core before it serves entries.
    pub fn setup_channel(&self, pool: &mut PagePool) -> Result<(), ChannelError> {
        self.registry.setup(pool, &self.call)
    }

    /// The channel registry, for boot-time inspection.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Handles one entry from the untrusted domain and returns its outcome.
    ///
    /// Does not report the outcome back; [`Self::serve`] does both.
    ///
    /// Panics if a resume entry names a suspended thread but presents a token
    /// that does not match. A caller holding a real token never fails this
    /// way, so a mismatch means the call sequence itself is corrupt and
    /// continuing could hand one caller's thread to another.
    pub fn handle_entry(&self, words: &[u64; ENTRY_WORDS]) -> Result<Outcome, DispatchError> {
        match Entry::decode(words)? {
            Entry::StdCall { args } => {
                let id = self.pool.acquire().map_err(|_| {
                    debug!("Thread pool exhausted, reporting busy");
                    DispatchError::Busy
                })?;
                let mut regs = RegisterFile::EMPTY;
                regs.write_args(&args);
                Ok(self.run_thread(id, regs))
            }
            Entry::Resume { thread, token } => {
                if let Err(e) = self.pool.resume(thread, token) {
                    panic!("resume of thread {thread} rejected: {e}");
                }
                let regs = self.pool.registers(thread);
                Ok(self.run_thread(thread, regs))
            }
        }
    }

    /// Handles one entry and reports its outcome to the untrusted domain
    /// through the channel.
    pub fn serve(&self, words: &[u64; ENTRY_WORDS]) -> Result<(), CallError> {
        let mut payload = CompletionPayload::default();
        match self.handle_entry(words) {
            Ok(Outcome::Completed { ret }) => {
                payload.data[0] = RETURN_OK;
                payload.data[1..].copy_from_slice(&ret);
            }
            Ok(Outcome::Yielded { thread, token }) => {
                payload.data[0] = RETURN_YIELD;
                payload.data[1] = thread.raw();
                payload.data[2] = token.raw();
            }
            Err(DispatchError::Busy) => payload.data[0] = RETURN_BUSY,
            Err(DispatchError::BadEntry) => payload.data[0] = RETURN_BAD_ENTRY,
        }
        marshal::return_to_untrusted(&self.registry, &self.call, self.channel_id, &payload)
    }

    fn run_thread(&self, id: ThreadId, mut regs: RegisterFile) -> Outcome {
        loop {
            trace!("{:?} -> {:?}, thread {id}", World::Untrusted, World::Secure);
            match self.runner.run(&mut regs) {
                RunResult::Completed(ret) => {
                    self.pool.release(id);
                    debug!("Thread {id} completed its call");
                    return Outcome::Completed { ret };
                }
                RunResult::ForeignInterrupt => {
                    let token = self.pool.suspend(id, &regs);
                    debug!("Thread {id} yielded for a foreign interrupt");
                    return Outcome::Yielded { thread: id, token };
                }
                RunResult::NativeInterrupt => {
                    // Handle it here and re-enter without a world switch.
                    PlatformImpl::handle_native_interrupt();
                }
            }
        }
    }
}
