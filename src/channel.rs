// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-core shared-memory channels to the firmware layer below.
//!
//! Each core that enters the secure kernel owns exactly one channel page,
//! negotiated once at boot and then fixed for the lifetime of the system. All
//! access to a channel happens on its owning core with exceptions masked, so a
//! trap handler can never observe a channel mid-update.

use crate::pagepool::{ChannelPage, PAGE_SIZE, PagePool};
use crate::platform::{CoresImpl, PerCoreState, Platform, PlatformImpl, exception_free};
use crate::sbi::{self, CallPrimitive};
use core::cell::RefCell;
use core::fmt::{self, Display, Formatter};
use log::{error, info};
use percore::{Cores, ExceptionLock};

/// Errors returned by channel setup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelError {
    /// The current core already negotiated its channel.
    AlreadyActive,
    /// The page pool is out of pages.
    AllocationFailed,
    /// The firmware layer refused the registration.
    Rejected(i64),
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::AlreadyActive => f.write_str("channel already active on this core"),
            Self::AllocationFailed => f.write_str("no channel page available"),
            Self::Rejected(code) => write!(f, "registration rejected with code {code}"),
        }
    }
}

/// One core's channel slot.
struct ChannelEntry {
    /// The channel page, present once negotiation has succeeded.
    page: Option<&'static mut ChannelPage>,
    /// Physical address registered with the firmware layer.
    physical_address: usize,
}

impl ChannelEntry {
    const EMPTY: Self = Self {
        page: None,
        physical_address: 0,
    };
}

/// The per-core table of transport channels.
pub struct ChannelRegistry {
    entries: PerCoreState<ChannelEntry>,
}

impl ChannelRegistry {
    /// Creates a registry with every core's channel unnegotiated.
    pub const fn new() -> Self {
        Self {
            entries: PerCoreState::new(
                [const { ExceptionLock::new(RefCell::new(ChannelEntry::EMPTY)) };
                    PlatformImpl::CORE_COUNT],
            ),
        }
    }

    /// Negotiates the current core's channel with the firmware layer.
    ///
    /// Takes a page from the pool and registers its physical address. The
    /// channel only becomes active once the firmware layer has accepted the
    /// registration; a rejected page is discarded and the channel may be set
    /// up again. Exceptions cannot stay masked across the registration call,
    /// so the commit re-checks that no handler negotiated a channel in the
    /// meantime; the later registration loses and its page is discarded.
    pub fn setup(
        &self,
        pool: &mut PagePool,
        call: &impl CallPrimitive,
    ) -> Result<(), ChannelError> {
        exception_free(|token| {
            if self.entries.get().borrow(token).borrow().page.is_some() {
                Err(ChannelError::AlreadyActive)
            } else {
                Ok(())
            }
        })?;

        let page = pool.alloc().ok_or(ChannelError::AllocationFailed)?;
        let pa = PlatformImpl::virt_to_phys(page.address());

        let ret = call.call(
            sbi::EXT_MPXY,
            sbi::MPXY_SET_SHMEM,
            [PAGE_SIZE as u64, pa as u64, 0, 0, 0, 0],
        );
        if !ret.is_ok() {
            error!(
                "Channel registration rejected on core {}: {}",
                CoresImpl::core_index(),
                sbi::ErrorCode(ret.error)
            );
            return Err(ChannelError::Rejected(ret.error));
        }

        exception_free(|token| {
            let mut entry = self.entries.get().borrow_mut(token);
            if entry.page.is_some() {
                return Err(ChannelError::AlreadyActive);
            }
            entry.physical_address = pa;
            entry.page = Some(page);
            Ok(())
        })?;
        info!(
            "Channel active on core {} at {:#x}",
            CoresImpl::core_index(),
            pa
        );
        Ok(())
    }

    /// Whether the current core's channel has been negotiated.
    pub fn is_active(&self) -> bool {
        exception_free(|token| self.entries.get().borrow(token).borrow().page.is_some())
    }

    /// The registered physical address of the current core's channel.
    pub fn physical_address(&self) -> Option<usize> {
        exception_free(|token| {
            let entry = self.entries.get().borrow(token);
            let entry = entry.borrow();
            entry.page.as_ref().map(|_| entry.physical_address)
        })
    }

    /// Runs the given function on the current core's channel buffer, with
    /// exceptions masked for the duration.
    ///
    /// Panics if the channel has not been negotiated; using a channel before
    /// setup is a bug in the boot sequence, not a runtime condition.
    pub fn with_buffer<T>(&self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> T) -> T {
        exception_free(|token| {
            let mut entry = self.entries.get().borrow_mut(token);
            let page = match entry.page.as_mut() {
                Some(page) => page,
                None => panic!(
                    "channel used before setup on core {}",
                    CoresImpl::core_index()
                ),
            };
            f(page.bytes_mut())
        })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
