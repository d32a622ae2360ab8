//! ntfy event stream consumer.
//!
//! Subscribes to `{url}/{topic}/sse`, parses server-sent-event frames into
//! [`InboundMessage`]s, applies the priority threshold, and forwards qualifying messages
//! to the bridge. Owns the reconnect/backoff policy.

mod backoff;
mod message;
mod sse;
mod subscriber;

pub use backoff::Backoff;
pub use message::{decode_frame, FrameDecodeError, InboundMessage, DEFAULT_PRIORITY};
pub use sse::{SseFrame, SseParser};
pub use subscriber::{NtfySubscriber, StreamError};
