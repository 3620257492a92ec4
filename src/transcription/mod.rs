pub mod assembler;
pub mod channel;
pub mod wire;

pub use assembler::UtteranceAssembler;
pub use channel::{ChannelHandle, TranscriptionChannel};
pub use wire::{parse_engine_event, EngineEvent, TurnEvent};
