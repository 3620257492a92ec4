use crate::transcript::Speaker;

/// Pipeline-wide capture format: 16 kHz mono PCM16.
pub const SAMPLE_RATE: u32 = 16_000;
/// Frame duration the engine socket consumes.
pub const FRAME_DURATION_MS: u64 = 100;
/// Samples per emitted frame: floor(16000 * 0.1).
pub const SAMPLES_PER_FRAME: usize =
    (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;
/// Bytes per emitted frame (little-endian i16).
pub const BYTES_PER_FRAME: usize = SAMPLES_PER_FRAME * 2;

/// One fixed-duration slice of captured audio. Owned transiently by the
/// transcription channel until it goes out on the engine socket.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub channel: Speaker,
    pub sequence: u64,
    /// Exactly `BYTES_PER_FRAME` bytes of little-endian PCM16.
    pub pcm: Vec<u8>,
    pub captured_at_ms: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        FRAME_DURATION_MS
    }
}
