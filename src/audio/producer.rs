use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::capture::{CaptureSource, DeviceError};
use super::frame::{AudioFrame, SAMPLES_PER_FRAME};
use crate::transcript::Speaker;

/// Slices an arbitrary raw sample stream into exactly-sized frames.
/// Residual samples below one frame stay buffered until the next batch or a
/// reset.
pub(crate) struct Framer {
    channel: Speaker,
    residual: Vec<i16>,
    sequence: u64,
}

impl Framer {
    pub(crate) fn new(channel: Speaker) -> Self {
        Self {
            channel,
            residual: Vec::with_capacity(SAMPLES_PER_FRAME * 2),
            sequence: 0,
        }
    }

    pub(crate) fn push(&mut self, samples: &[i16], now_ms: u64) -> Vec<AudioFrame> {
        self.residual.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.residual.len() >= SAMPLES_PER_FRAME {
            let chunk: Vec<i16> = self.residual.drain(..SAMPLES_PER_FRAME).collect();
            let pcm: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            frames.push(AudioFrame {
                channel: self.channel,
                sequence: self.sequence,
                pcm,
                captured_at_ms: now_ms,
            });
            self.sequence += 1;
        }
        frames
    }

    /// Discard buffered audio. Called on stop so nothing crosses a
    /// stop/start cycle.
    pub(crate) fn reset(&mut self) {
        self.residual.clear();
    }

    pub(crate) fn buffered(&self) -> usize {
        self.residual.len()
    }
}

/// Captures one channel of live audio and emits fixed-duration PCM16 frames.
pub struct AudioFrameProducer {
    channel: Speaker,
    source: Box<dyn CaptureSource>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl AudioFrameProducer {
    pub fn new(channel: Speaker, source: Box<dyn CaptureSource>) -> Self {
        Self {
            channel,
            source,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn channel(&self) -> Speaker {
        self.channel
    }

    /// Acquire the capture source and start emitting frames. Fails with a
    /// classified `DeviceError` when acquisition is impossible.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(DeviceError::Backend("producer already running".into()));
        }

        let mut raw_rx = self.source.start().await?;
        self.running.store(true, Ordering::SeqCst);
        info!(channel = %self.channel, source = self.source.name(), "audio producer started");

        let (frames_tx, frames_rx) = mpsc::channel(32);
        let channel = self.channel;
        let running = Arc::clone(&self.running);

        let task = tokio::spawn(async move {
            let mut framer = Framer::new(channel);

            while let Some(batch) = raw_rx.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                for frame in framer.push(&batch, now_ms()) {
                    if frames_tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }

            // Whatever is left is below one frame; it never leaves.
            let dropped = framer.buffered();
            framer.reset();
            if dropped > 0 {
                debug!(channel = %channel, samples = dropped, "discarding sub-frame residual");
            }
        });
        self.task = Some(task);

        Ok(frames_rx)
    }

    /// Halt frame emission and release the device. Idempotent; after this
    /// returns no further frames are in flight.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.source.stop().await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(channel = %self.channel, "audio producer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::BYTES_PER_FRAME;

    #[test]
    fn test_framer_emits_exact_frames() {
        let mut framer = Framer::new(Speaker::Hr);

        // 4000 samples = 2 full frames + 800 residual.
        let frames = framer.push(&vec![1i16; 4000], 0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pcm.len(), BYTES_PER_FRAME);
        assert_eq!(frames[1].pcm.len(), BYTES_PER_FRAME);
        assert_eq!(framer.buffered(), 800);
    }

    #[test]
    fn test_framer_sequence_is_monotonic_across_batches() {
        let mut framer = Framer::new(Speaker::Candidate);

        let first = framer.push(&vec![0i16; 1600], 0);
        let second = framer.push(&vec![0i16; 3200], 0);
        assert_eq!(first[0].sequence, 0);
        assert_eq!(second[0].sequence, 1);
        assert_eq!(second[1].sequence, 2);
    }

    #[test]
    fn test_framer_accumulates_small_batches() {
        let mut framer = Framer::new(Speaker::Hr);

        for _ in 0..3 {
            assert!(framer.push(&vec![0i16; 500], 0).is_empty());
        }
        let frames = framer.push(&vec![0i16; 500], 0);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.buffered(), 400);
    }

    #[test]
    fn test_reset_discards_residual() {
        let mut framer = Framer::new(Speaker::Hr);
        framer.push(&vec![0i16; 900], 0);
        assert_eq!(framer.buffered(), 900);

        framer.reset();
        assert_eq!(framer.buffered(), 0);
        assert!(framer.push(&vec![0i16; 700], 0).is_empty());
    }

    #[test]
    fn test_pcm_is_little_endian() {
        let mut framer = Framer::new(Speaker::Hr);
        let mut samples = vec![0i16; 1600];
        samples[0] = 0x1234;
        let frames = framer.push(&samples, 0);
        assert_eq!(frames[0].pcm[0], 0x34);
        assert_eq!(frames[0].pcm[1], 0x12);
    }
}
