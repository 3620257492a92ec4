use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::frame::SAMPLE_RATE;

/// Why a capture device could not be acquired. Fatal to the owning producer
/// only; the other channel and the control plane are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The named device (or any default device) does not exist.
    NotFound(String),
    /// The platform refused access to the device.
    PermissionDenied(String),
    /// The audio backend failed for another reason.
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(msg) => write!(f, "capture device not found: {}", msg),
            DeviceError::PermissionDenied(msg) => write!(f, "capture access denied: {}", msg),
            DeviceError::Backend(msg) => write!(f, "capture backend error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A raw audio source feeding one producer with 16 kHz mono samples.
///
/// Implementations: cpal input devices for live capture, a scripted source
/// for tests.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Acquire the device and start delivering sample batches. The batch
    /// size is whatever the backend produces; the producer reframes them.
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<i16>>, DeviceError>;

    /// Release the device. Idempotent.
    async fn stop(&mut self);

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Live capture through a cpal input device.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that parks until stop. Preferred path is a native 16 kHz mono config;
/// when the device cannot do that we fall back to 48 kHz with decimation
/// rather than delivering nothing.
pub struct CpalSource {
    device_name: Option<String>,
    label: String,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalSource {
    pub fn new(label: impl Into<String>, device_name: Option<String>) -> Self {
        Self {
            device_name,
            label: label.into(),
            stop_tx: None,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for CpalSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<i16>>, DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::Backend("capture already started".into()));
        }

        let (samples_tx, samples_rx) = mpsc::channel::<Vec<i16>>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let device_name = self.device_name.clone();
        let label = self.label.clone();

        let worker = std::thread::spawn(move || {
            let stream = match build_input_stream(device_name.as_deref(), &label, samples_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                error!(source = %label, "failed to start capture stream: {}", e);
                return;
            }

            // Park until stop; dropping the stream releases the device.
            let _ = stop_rx.recv();
            drop(stream);
            info!(source = %label, "capture stream released");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(samples_rx)
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::Backend("capture thread died during setup".into())),
        }
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = worker.join();
            })
            .await;
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    label: &str,
    samples_tx: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| DeviceError::Backend(format!("failed to list devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(format!("device '{}'", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| DeviceError::NotFound("no default input device".into()))?,
    };

    let resolved = device.name().unwrap_or_else(|_| "unknown".into());
    info!(source = %label, device = %resolved, "using capture device");

    // Preferred path: native 16 kHz mono. Fallback: 48 kHz with decimation.
    let (config, decimate) = match try_config(&device, SAMPLE_RATE) {
        Some(cfg) => (cfg, 1usize),
        None => match try_config(&device, 48_000) {
            Some(cfg) => {
                let d = (cfg.sample_rate.0 / SAMPLE_RATE).max(1) as usize;
                warn!(
                    source = %label,
                    "16kHz unavailable, using {}Hz with {}:1 decimation",
                    cfg.sample_rate.0, d
                );
                (cfg, d)
            }
            None => {
                let default = device.default_input_config().map_err(|e| {
                    classify_config_error(&e.to_string())
                })?;
                let rate = default.sample_rate().0;
                let d = (rate / SAMPLE_RATE).max(1) as usize;
                warn!(
                    source = %label,
                    "no preferred config, using default {}Hz {}ch with {}:1 decimation",
                    rate,
                    default.channels(),
                    d
                );
                (
                    StreamConfig {
                        channels: default.channels(),
                        sample_rate: default.sample_rate(),
                        buffer_size: cpal::BufferSize::Default,
                    },
                    d,
                )
            }
        },
    };

    let channels = config.channels as usize;
    let label_cb = label.to_string();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples = convert_batch(data, channels, decimate);
                // Capture callbacks must never block; a full queue means the
                // consumer stopped, so the batch is dropped.
                let _ = samples_tx.try_send(samples);
            },
            {
                let label_err = label_cb.clone();
                move |err| {
                    error!(source = %label_err, "capture stream error: {}", err);
                }
            },
            None,
        )
        .map_err(classify_build_error)?;

    Ok(stream)
}

fn try_config(device: &cpal::Device, rate: u32) -> Option<StreamConfig> {
    let supported = device.supported_input_configs().ok()?;
    for range in supported {
        if range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0 {
            return Some(StreamConfig {
                channels: range.channels(),
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }
    None
}

/// Downmix to mono, decimate to the target rate, convert f32 to i16.
fn convert_batch(data: &[f32], channels: usize, decimate: usize) -> Vec<i16> {
    let mono: Vec<f32> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    };

    mono.iter()
        .step_by(decimate.max(1))
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

fn classify_build_error(e: cpal::BuildStreamError) -> DeviceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::NotFound("device disappeared".into())
        }
        other => classify_config_error(&other.to_string()),
    }
}

fn classify_config_error(message: &str) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        DeviceError::PermissionDenied(message.to_string())
    } else {
        DeviceError::Backend(message.to_string())
    }
}

/// Deterministic source for tests and fixtures: delivers the scripted sample
/// batches in order, then ends the stream.
pub struct ScriptedSource {
    label: String,
    batches: Vec<Vec<i16>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ScriptedSource {
    pub fn new(label: impl Into<String>, batches: Vec<Vec<i16>>) -> Self {
        Self {
            label: label.into(),
            batches,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<i16>>, DeviceError> {
        let (tx, rx) = mpsc::channel(64);
        let batches = std::mem::take(&mut self.batches);
        self.task = Some(tokio::spawn(async move {
            for batch in batches {
                if tx.send(batch).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// A source that always fails acquisition; used to exercise the device
/// error path without real hardware.
pub struct FailingSource {
    label: String,
    error: DeviceError,
}

impl FailingSource {
    pub fn new(label: impl Into<String>, error: DeviceError) -> Self {
        Self {
            label: label.into(),
            error,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for FailingSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<i16>>, DeviceError> {
        Err(self.error.clone())
    }

    async fn stop(&mut self) {}

    fn name(&self) -> &str {
        &self.label
    }
}

/// List input device names for CLI discovery.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}
