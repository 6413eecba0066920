// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Boot-time discovery of the message proxy channel.
//!
//! The channel id comes from the platform's device tree, as a single 32-bit
//! big-endian cell. Discovery failures are fatal: without a channel the
//! secure kernel cannot talk to anyone, so there is nothing sensible to fall
//! back to.

use crate::sbi::{self, CallPrimitive};
use core::fmt::{self, Display, Formatter};
use log::info;

/// Errors decoding the channel id property.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The property is absent from the device tree.
    MissingProperty,
    /// The property is not exactly one 32-bit cell.
    BadPropertySize(usize),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::MissingProperty => f.write_str("channel id property missing"),
            Self::BadPropertySize(len) => {
                write!(f, "channel id property has {len} bytes, expected 4")
            }
        }
    }
}

/// The negotiated identity of the proxy channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelConfig {
    channel_id: u32,
}

impl ChannelConfig {
    /// Decodes the channel id from its device tree property bytes.
    pub fn from_property(property: Option<&[u8]>) -> Result<Self, ConfigError> {
        let property = property.ok_or(ConfigError::MissingProperty)?;
        let bytes: [u8; 4] = property
            .try_into()
            .map_err(|_| ConfigError::BadPropertySize(property.len()))?;
        Ok(Self {
            channel_id: u32::from_be_bytes(bytes),
        })
    }

    /// The id to pass with every message on this channel.
    pub const fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Probes for the message proxy extension and decodes the channel id.
    ///
    /// Panics if the extension is absent or the property is unusable; both
    /// are configuration errors which no later call could correct.
    pub fn init(call: &impl CallPrimitive, property: Option<&[u8]>) -> Self {
        if !sbi::probe_extension(call, sbi::EXT_MPXY) {
            panic!("firmware layer does not implement the message proxy extension");
        }
        let config = match Self::from_property(property) {
            Ok(config) => config,
            Err(e) => panic!("channel discovery failed: {e}"),
        };
        info!("Using proxy channel {}", config.channel_id);
        config
    }
}
