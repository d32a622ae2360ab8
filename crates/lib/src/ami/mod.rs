//! Asterisk Manager Interface (AMI) client for placing alert calls.
//!
//! Each originate opens a fresh TCP session: banner, Login, Originate, Logoff. Responses are
//! matched to requests by `ActionID`; unrelated events interleaved on the stream are dropped.

mod client;
mod error;
mod protocol;

pub use client::{ActionAck, AmiClient, OriginateRequest, Originator, LOGOFF_TIMEOUT};
pub use error::AmiError;
pub use protocol::{encode_action, read_frame, AmiFrame, DEFAULT_AMI_PORT};
