pub mod capture;
pub mod frame;
pub mod producer;

pub use capture::{
    list_input_devices, CaptureSource, CpalSource, DeviceError, FailingSource, ScriptedSource,
};
pub use frame::{AudioFrame, BYTES_PER_FRAME, FRAME_DURATION_MS, SAMPLES_PER_FRAME, SAMPLE_RATE};
pub use producer::AudioFrameProducer;
