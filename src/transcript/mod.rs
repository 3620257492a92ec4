pub mod block;
pub mod publisher;
pub mod store;

pub use block::{Speaker, TranscriptEntry, UtteranceBlock};
pub use publisher::{ControlSink, TranscriptPublisher};
pub use store::{LiveUtterance, TranscriptStore};
