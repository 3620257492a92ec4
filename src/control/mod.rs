pub mod backoff;
pub mod channel;
pub mod messages;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{ControlChannel, ControlEvent, ControlState, CLIENT_CLOSE_CODE};
pub use messages::{parse_inbound, InboundMessage, OutboundMessage, ServerTranscript, TranscriptPayload};
