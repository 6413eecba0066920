// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Encoding and movement of call payloads through the transport channel.
//!
//! A message travels as registers plus shared memory: the channel id, message
//! id and payload length ride in the call's argument registers, while the
//! payload bytes sit in the calling core's channel page. The firmware layer
//! writes any response into the same page before the call returns.

use crate::channel::ChannelRegistry;
use crate::pagepool::PAGE_SIZE;
use crate::sbi::{self, CallPrimitive};
use arrayvec::ArrayVec;
use core::fmt::{self, Display, Formatter};
use log::warn;
use zerocopy::{Immutable, IntoBytes};

/// Message id of a call routed into the secure kernel.
pub const MSG_COMMUNICATE: u32 = 0x01;
/// Message id of a completed or yielded call's result.
pub const MSG_COMPLETE: u32 = 0x02;

/// The number of register words in a completion payload.
pub const COMPLETION_WORDS: usize = 5;

/// The payload reported back to the untrusted domain when a call finishes or
/// yields.
#[derive(Clone, Copy, Debug, Default, Eq, Immutable, IntoBytes, PartialEq)]
#[repr(C)]
pub struct CompletionPayload {
    /// Status word followed by up to four result words.
    pub data: [u64; COMPLETION_WORDS],
}

/// A response received through the channel, at most one page long.
pub type Response = ArrayVec<u8, PAGE_SIZE>;

/// Errors moving a message through the channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallError {
    /// The request does not fit in the channel page.
    MessageTooLarge,
    /// The firmware layer claimed a response longer than the channel page.
    ResponseTooLarge,
    /// The firmware layer failed the send.
    Transport(i64),
}

impl Display for CallError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::MessageTooLarge => f.write_str("request larger than the channel page"),
            Self::ResponseTooLarge => f.write_str("response larger than the channel page"),
            Self::Transport(code) => write!(f, "transport failed with code {code}"),
        }
    }
}

/// Sends a message on the current core's channel and waits for its response.
///
/// The request bytes are copied into the channel page before the call and the
/// response bytes are copied back out after it, each with exceptions masked.
/// The channel page is never exposed to callers.
pub fn send_with_response(
    registry: &ChannelRegistry,
    call: &impl CallPrimitive,
    channel_id: u32,
    message_id: u32,
    request: &[u8],
) -> Result<Response, CallError> {
    if request.len() > PAGE_SIZE {
        return Err(CallError::MessageTooLarge);
    }
    if !request.is_empty() {
        registry.with_buffer(|buffer| buffer[..request.len()].copy_from_slice(request));
    }

    let ret = call.call(
        sbi::EXT_MPXY,
        sbi::MPXY_SEND_MESSAGE_WITH_RESPONSE,
        [
            channel_id.into(),
            message_id.into(),
            request.len() as u64,
            0,
            0,
            0,
        ],
    );
    if !ret.is_ok() {
        warn!(
            "Message {message_id:#x} on channel {channel_id} failed: {}",
            sbi::ErrorCode(ret.error)
        );
        return Err(CallError::Transport(ret.error));
    }

    let response_len = usize::try_from(ret.value).map_err(|_| CallError::ResponseTooLarge)?;
    if response_len > PAGE_SIZE {
        warn!("Channel {channel_id} claimed a {response_len} byte response");
        return Err(CallError::ResponseTooLarge);
    }
    registry.with_buffer(|buffer| {
        Response::try_from(&buffer[..response_len]).map_err(|_| CallError::ResponseTooLarge)
    })
}

/// Reports a finished or yielded call back to the untrusted domain.
///
/// Any response bytes to the completion message are ignored.
pub fn return_to_untrusted(
    registry: &ChannelRegistry,
    call: &impl CallPrimitive,
    channel_id: u32,
    payload: &CompletionPayload,
) -> Result<(), CallError> {
    send_with_response(registry, call, channel_id, MSG_COMPLETE, payload.as_bytes()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagepool::PagePool;
    use crate::platform::fake::{FakeCall, leak_pages};

    fn active_registry(call: &FakeCall) -> ChannelRegistry {
        let registry = ChannelRegistry::new();
        let mut pool = PagePool::new(leak_pages(1));
        registry.setup(&mut pool, call).unwrap();
        registry
    }

    #[test]
    fn echo_round_trip() {
        let call = FakeCall::new();
        let registry = active_registry(&call);

        let request = b"attestation request";
        let response =
            send_with_response(&registry, &call, 7, MSG_COMMUNICATE, request).unwrap();
        assert_eq!(response.as_slice(), request);

        let sends: Vec<_> = call
            .calls()
            .into_iter()
            .filter(|(_, function, _)| *function == sbi::MPXY_SEND_MESSAGE_WITH_RESPONSE)
            .collect();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].2[0], 7);
        assert_eq!(sends[0].2[1], u64::from(MSG_COMMUNICATE));
        assert_eq!(sends[0].2[2], request.len() as u64);
    }

    #[test]
    fn scripted_response() {
        let call = FakeCall::new();
        let registry = active_registry(&call);
        call.set_response(b"result");

        let response = send_with_response(&registry, &call, 1, MSG_COMMUNICATE, b"x").unwrap();
        assert_eq!(response.as_slice(), b"result");
    }

    #[test]
    fn empty_request_and_response() {
        let call = FakeCall::new();
        let registry = active_registry(&call);

        let response = send_with_response(&registry, &call, 1, MSG_COMMUNICATE, &[]).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn oversized_request_leaves_buffer_untouched() {
        let call = FakeCall::new();
        let registry = active_registry(&call);
        registry.with_buffer(|buffer| buffer.fill(0xa5));

        let request = vec![0u8; PAGE_SIZE + 1];
        assert_eq!(
            send_with_response(&registry, &call, 1, MSG_COMMUNICATE, &request),
            Err(CallError::MessageTooLarge)
        );
        registry.with_buffer(|buffer| assert!(buffer.iter().all(|&b| b == 0xa5)));
        // The failed request never reached the firmware layer.
        assert_eq!(call.calls().len(), 1);
    }

    #[test]
    fn transport_error_is_surfaced() {
        let call = FakeCall::new();
        let registry = active_registry(&call);
        call.fail_send(-4);

        assert_eq!(
            send_with_response(&registry, &call, 1, MSG_COMMUNICATE, b"x"),
            Err(CallError::Transport(-4))
        );
    }

    #[test]
    fn overlong_response_claim_is_rejected() {
        let call = FakeCall::new();
        let registry = active_registry(&call);
        call.claim_response_len(PAGE_SIZE as u64 + 1);

        assert_eq!(
            send_with_response(&registry, &call, 1, MSG_COMMUNICATE, b"x"),
            Err(CallError::ResponseTooLarge)
        );
    }

    #[test]
    fn completion_payload_reaches_buffer() {
        let call = FakeCall::new();
        let registry = active_registry(&call);

        let payload = CompletionPayload {
            data: [1, 2, 3, 4, 5],
        };
        return_to_untrusted(&registry, &call, 9, &payload).unwrap();

        registry.with_buffer(|buffer| {
            assert_eq!(&buffer[..payload.as_bytes().len()], payload.as_bytes());
        });
        let last = call.calls().pop().unwrap();
        assert_eq!(last.2[1], u64::from(MSG_COMPLETE));
        assert_eq!(last.2[2], payload.as_bytes().len() as u64);
    }
}
