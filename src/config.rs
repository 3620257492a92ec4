use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    pub ws_url: String,
    pub http_base_url: String,
    pub ping_interval_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    /// Input device for the interviewer channel; None picks the default.
    pub hr_device: Option<String>,
    /// Input device for the candidate channel (e.g. a loopback device
    /// carrying the shared-screen audio); None picks the default.
    pub candidate_device: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "interview-relay".to_string(),
            mode: "realtime".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "wss://streaming.assemblyai.com/v3/ws".to_string(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws".to_string(),
            http_base_url: "http://localhost:8000".to_string(),
            ping_interval_secs: 15,
            backoff_initial_ms: 1000,
            backoff_cap_ms: 30_000,
            backoff_max_attempts: 8,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            hr_device: None,
            candidate_device: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
