pub mod audio;
pub mod config;
pub mod control;
pub mod credentials;
pub mod session;
pub mod transcript;
pub mod transcription;

pub use audio::{
    AudioFrame, AudioFrameProducer, CaptureSource, CpalSource, DeviceError, ScriptedSource,
};
pub use config::Config;
pub use control::{
    BackoffConfig, ControlChannel, ControlEvent, ControlState, InboundMessage, OutboundMessage,
    TranscriptPayload,
};
pub use session::{SessionConfig, SessionOrchestrator, SessionState, SessionStats};
pub use transcript::{
    ControlSink, Speaker, TranscriptEntry, TranscriptPublisher, TranscriptStore, UtteranceBlock,
};
pub use transcription::{TranscriptionChannel, TurnEvent, UtteranceAssembler};
