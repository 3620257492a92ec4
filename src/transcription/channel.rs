use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::assembler::UtteranceAssembler;
use super::wire::{engine_request, parse_engine_event, terminate_message, EngineEvent};
use crate::audio::{AudioFrame, SAMPLE_RATE};
use crate::transcript::{Speaker, UtteranceBlock};

/// One outbound streaming socket to the transcription engine, bound to the
/// lifetime of its producer. The socket never reconnects itself: if it dies
/// mid-session the whole producer/channel pair must be restarted by the
/// caller, since the active utterance is corrupt either way.
pub struct TranscriptionChannel {
    speaker: Speaker,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TranscriptionChannel {
    /// Open the engine socket and confirm the connection before any frames
    /// flow; otherwise the opening of the first utterance is silently lost.
    pub async fn connect(base_url: &str, token: &str, speaker: Speaker) -> anyhow::Result<Self> {
        let request = engine_request(base_url, token, SAMPLE_RATE)?;
        let (ws, _) = connect_async(request)
            .await
            .with_context(|| format!("engine socket connect failed for {} channel", speaker))?;
        info!(channel = %speaker, "engine socket open");
        Ok(Self { speaker, ws })
    }

    /// Start the frame-forwarding and event-assembly tasks.
    pub fn run(
        self,
        mut frames_rx: mpsc::Receiver<AudioFrame>,
        blocks_tx: mpsc::Sender<UtteranceBlock>,
    ) -> ChannelHandle {
        let speaker = self.speaker;
        let open = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));
        let (mut ws_tx, mut ws_rx) = self.ws.split();

        // Frame forwarding. A frame that arrives while the socket is not
        // open is dropped, never buffered: stale audio is worthless live.
        let open_send = Arc::clone(&open);
        let dropped_send = Arc::clone(&dropped);
        let send_task = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if !open_send.load(Ordering::SeqCst) {
                    dropped_send.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                if let Err(e) = ws_tx
                    .send(tungstenite::Message::Binary(frame.pcm.into()))
                    .await
                {
                    warn!(channel = %speaker, "engine socket send failed: {}", e);
                    open_send.store(false, Ordering::SeqCst);
                    dropped_send.fetch_add(1, Ordering::SeqCst);
                }
            }

            // Producer stopped. Ask the engine to finish the stream, give it
            // a moment to deliver trailing turns, then close.
            if open_send.load(Ordering::SeqCst) {
                let _ = ws_tx
                    .send(tungstenite::Message::Text(terminate_message().into()))
                    .await;
                tokio::time::sleep(Duration::from_millis(1500)).await;
            }
            let _ = ws_tx.close().await;

            let total_dropped = dropped_send.load(Ordering::SeqCst);
            if total_dropped > 0 {
                warn!(channel = %speaker, frames = total_dropped, "frames dropped while socket closed");
            }
        });

        // Event side: turn events feed this channel's assembler; blocks go
        // up to the shared publisher.
        let open_recv = Arc::clone(&open);
        let recv_task = tokio::spawn(async move {
            let mut assembler = UtteranceAssembler::new(speaker);

            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(tungstenite::Message::Text(text)) => text,
                    Ok(tungstenite::Message::Close(frame)) => {
                        info!(channel = %speaker, ?frame, "engine socket closed");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(channel = %speaker, "engine socket error: {}", e);
                        break;
                    }
                };

                match parse_engine_event(&text) {
                    Ok(EngineEvent::Turn(event)) => {
                        for block in assembler.apply(&event, now_ms()) {
                            if blocks_tx.send(block).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(EngineEvent::SessionBegin(id)) => {
                        info!(channel = %speaker, engine_session = %id, "engine session started");
                    }
                    Ok(EngineEvent::SessionTerminated) => {
                        info!(channel = %speaker, "engine session terminated");
                        break;
                    }
                    Ok(EngineEvent::Ignored(event_type)) => {
                        debug!(channel = %speaker, event_type = %event_type, "ignoring engine event");
                    }
                    Err(e) => {
                        warn!(channel = %speaker, "malformed engine event: {}", e);
                    }
                }
            }

            open_recv.store(false, Ordering::SeqCst);

            // The in-flight utterance survives a stop or socket loss.
            if let Some(block) = assembler.flush(now_ms()) {
                let _ = blocks_tx.send(block).await;
            }
        });

        ChannelHandle {
            speaker,
            open,
            send_task,
            recv_task,
        }
    }
}

/// Running channel pair of tasks. Teardown is driven by stopping the
/// producer (which ends the frame stream) and then awaiting the handle.
pub struct ChannelHandle {
    speaker: Speaker,
    open: Arc<AtomicBool>,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    /// Whether the engine socket is still usable for frames.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Await both tasks. Call after stopping the owning producer.
    pub async fn shutdown(self) {
        let _ = self.send_task.await;
        let _ = self.recv_task.await;
        info!(channel = %self.speaker, "transcription channel shut down");
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
