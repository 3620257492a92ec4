use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use interview_relay::audio::{list_input_devices, CpalSource};
use interview_relay::control::{BackoffConfig, ControlChannel, ControlEvent, ControlState};
use interview_relay::{Config, SessionConfig, SessionOrchestrator, TranscriptStore};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "interview-relay", about = "Live two-channel interview transcription relay")]
struct Args {
    /// Config file (without extension), e.g. config/interview-relay
    #[arg(long, default_value = "config/interview-relay")]
    config: String,

    /// Session-server auth token for the start handshake
    #[arg(long, default_value = "")]
    token: String,

    /// Override the control-plane WebSocket URL
    #[arg(long)]
    control_url: Option<String>,

    /// Override the transcription engine URL
    #[arg(long)]
    engine_url: Option<String>,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.list_devices {
        for name in list_input_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    let session_config = SessionConfig {
        auth_token: args.token.clone(),
        mode: cfg.service.mode.clone(),
        engine_url: args.engine_url.unwrap_or(cfg.engine.url.clone()),
        control_url: args.control_url.unwrap_or(cfg.control.ws_url.clone()),
        server_base_url: cfg.control.http_base_url.clone(),
        ping_interval: Duration::from_secs(cfg.control.ping_interval_secs),
        backoff: BackoffConfig {
            initial: Duration::from_millis(cfg.control.backoff_initial_ms),
            cap: Duration::from_millis(cfg.control.backoff_cap_ms),
            max_attempts: cfg.control.backoff_max_attempts,
        },
        ..SessionConfig::default()
    };

    let (control, mut control_events) = ControlChannel::new(
        session_config.control_url.clone(),
        session_config.ping_interval,
        session_config.backoff.clone(),
    );
    control.connect().await;

    let store = Arc::new(TranscriptStore::new());
    let mut orchestrator =
        SessionOrchestrator::new(session_config, Arc::clone(&control), Arc::clone(&store));

    // Capture starts once the control channel confirms Open.
    let mut started = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, ending session");
                orchestrator.end().await?;
                break;
            }
            event = control_events.recv() => {
                let Some(event) = event else {
                    warn!("control event stream ended");
                    orchestrator.end().await?;
                    break;
                };
                match event {
                    ControlEvent::StateChanged(ControlState::Open) if !started => {
                        let hr = Box::new(CpalSource::new("hr-mic", cfg.audio.hr_device.clone()));
                        let candidate = Box::new(CpalSource::new(
                            "candidate-loopback",
                            cfg.audio.candidate_device.clone(),
                        ));
                        match orchestrator.start(hr, candidate).await {
                            Ok(()) => started = true,
                            Err(e) => {
                                warn!("session start rejected: {:#}", e);
                                orchestrator.end().await?;
                                break;
                            }
                        }
                    }
                    ControlEvent::StateChanged(ControlState::Failed) => {
                        warn!("control channel failed after exhausting reconnect attempts");
                        orchestrator.end().await?;
                        break;
                    }
                    ControlEvent::StateChanged(state) => {
                        info!(?state, "control channel state");
                    }
                    ControlEvent::Message(message) => {
                        if orchestrator.handle_control_message(message) {
                            orchestrator.end().await?;
                            break;
                        }
                    }
                }
            }
        }
    }

    let stats = orchestrator.stats();
    info!(
        entries = stats.final_entries,
        "session complete, transcript entries collected"
    );
    Ok(())
}
