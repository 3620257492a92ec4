use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, BackoffConfig};
use super::messages::{parse_inbound, InboundMessage, OutboundMessage, TranscriptPayload};
use crate::transcript::ControlSink;

/// Close code for client-initiated shutdown. A closure carrying this code is
/// clean and must not trigger reconnection.
pub const CLIENT_CLOSE_CODE: u16 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    /// Reconnect attempts exhausted. Terminal until `connect()` is called
    /// again by an external retry.
    Failed = 3,
}

impl ControlState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ControlState::Connecting,
            2 => ControlState::Open,
            3 => ControlState::Failed,
            _ => ControlState::Disconnected,
        }
    }
}

/// Events the dispatcher routes to the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    StateChanged(ControlState),
    Message(InboundMessage),
}

/// The single connection to the session server.
///
/// One dispatcher task owns the socket end to end: it drains the outbound
/// queue, routes inbound frames by their `type` discriminator onto the event
/// channel, and runs the reconnect loop. Callers interact only through
/// `send()` (drop-not-queue semantics) and the event receiver, so no handler
/// closures ever capture connection state.
pub struct ControlChannel {
    url: String,
    ping_interval: Duration,
    backoff_config: BackoffConfig,
    state: Arc<AtomicU8>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
    events_tx: mpsc::Sender<ControlEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    pub fn new(
        url: String,
        ping_interval: Duration,
        backoff_config: BackoffConfig,
    ) -> (Arc<Self>, mpsc::Receiver<ControlEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        let channel = Arc::new(Self {
            url,
            ping_interval,
            backoff_config,
            state: Arc::new(AtomicU8::new(ControlState::Disconnected as u8)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            events_tx,
            shutdown_tx,
            task: Mutex::new(None),
        });

        (channel, events_rx)
    }

    pub fn state(&self) -> ControlState {
        ControlState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Start the dispatcher. No-op while a connection attempt or an open
    /// connection is already in progress.
    pub async fn connect(self: &Arc<Self>) {
        match self.state() {
            ControlState::Connecting | ControlState::Open => return,
            ControlState::Disconnected | ControlState::Failed => {}
        }

        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let _ = self.shutdown_tx.send(false);
        self.set_state(ControlState::Connecting).await;

        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    /// Dispatch a message if the connection is open right now. Returns false
    /// when the message was dropped; it is never queued for later.
    pub fn send(&self, message: OutboundMessage) -> bool {
        if self.state() != ControlState::Open {
            return false;
        }
        self.outbound_tx.try_send(message).is_ok()
    }

    /// Close with the client-initiated code and cancel any pending reconnect
    /// timer. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("control dispatcher task panicked: {}", e);
            }
        }
    }

    async fn set_state(&self, state: ControlState) {
        let previous = ControlState::from_u8(
            self.state.swap(state as u8, Ordering::SeqCst),
        );
        if previous != state {
            debug!(?previous, current = ?state, "control channel state change");
            let _ = self
                .events_tx
                .send(ControlEvent::StateChanged(state))
                .await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut outbound_rx = self.outbound_rx.lock().await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = Backoff::new(self.backoff_config.clone());

        loop {
            if *shutdown_rx.borrow() {
                self.set_state(ControlState::Disconnected).await;
                return;
            }

            self.set_state(ControlState::Connecting).await;
            info!(url = %self.url, "connecting to session server");

            let ws = match connect_async(&self.url).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    warn!("control connection failed: {}", e);
                    match backoff.next_delay() {
                        Some(delay) => {
                            info!(attempt = backoff.attempt(), ?delay, "scheduling reconnect");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => continue,
                                _ = shutdown_rx.changed() => {
                                    self.set_state(ControlState::Disconnected).await;
                                    return;
                                }
                            }
                        }
                        None => {
                            error!("control connection failed after {} attempts", backoff.attempt());
                            self.set_state(ControlState::Failed).await;
                            return;
                        }
                    }
                }
            };

            backoff.reset();

            // send() refused everything while we were down, but anything that
            // raced its way in is stale now; drop it rather than replay it.
            while outbound_rx.try_recv().is_ok() {}

            let (mut ws_tx, mut ws_rx) = ws.split();
            info!("control channel open");

            // Initial liveness probe.
            if let Err(e) = send_json(&mut ws_tx, &OutboundMessage::Ping).await {
                warn!("liveness probe failed: {}", e);
                self.set_state(ControlState::Disconnected).await;
                continue;
            }
            self.set_state(ControlState::Open).await;

            let mut ping = tokio::time::interval(self.ping_interval);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ping.tick().await;

            let clean_close = loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        let frame = CloseFrame {
                            code: CloseCode::Library(CLIENT_CLOSE_CODE),
                            reason: "session ended".into(),
                        };
                        let _ = ws_tx.send(tungstenite::Message::Close(Some(frame))).await;
                        break true;
                    }
                    outbound = outbound_rx.recv() => {
                        let Some(message) = outbound else { break true };
                        if let Err(e) = send_json(&mut ws_tx, &message).await {
                            warn!("control send failed: {}", e);
                            break false;
                        }
                    }
                    _ = ping.tick() => {
                        if let Err(e) = send_json(&mut ws_tx, &OutboundMessage::Ping).await {
                            warn!("control ping failed: {}", e);
                            break false;
                        }
                    }
                    frame = ws_rx.next() => {
                        match frame {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                self.dispatch(&text).await;
                            }
                            Some(Ok(tungstenite::Message::Close(frame))) => {
                                let code = frame.as_ref().map(|f| u16::from(f.code));
                                info!(?code, "control channel closed by server");
                                break code == Some(CLIENT_CLOSE_CODE);
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("control socket error: {}", e);
                                break false;
                            }
                            None => {
                                info!("control socket stream ended");
                                break false;
                            }
                        }
                    }
                }
            };

            self.set_state(ControlState::Disconnected).await;
            if clean_close {
                return;
            }
        }
    }

    /// Route one inbound frame. Malformed or unrecognized frames are logged
    /// and ignored; they never fail the dispatcher.
    async fn dispatch(&self, raw: &str) {
        match parse_inbound(raw) {
            Ok(Some(message)) => {
                let _ = self.events_tx.send(ControlEvent::Message(message)).await;
            }
            Ok(None) => {
                debug!(frame = raw, "ignoring unrecognized control message type");
            }
            Err(e) => {
                warn!("malformed control message: {}", e);
            }
        }
    }
}

impl ControlSink for ControlChannel {
    fn forward_final(&self, payload: TranscriptPayload) -> bool {
        self.send(OutboundMessage::Transcript { payload })
    }

    fn forward_partial(&self, payload: TranscriptPayload) -> bool {
        self.send(OutboundMessage::PartialTranscript { payload })
    }
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tungstenite::Message,
>;

async fn send_json(ws_tx: &mut WsSink, message: &OutboundMessage) -> anyhow::Result<()> {
    let text = serde_json::to_string(message)?;
    ws_tx.send(tungstenite::Message::Text(text.into())).await?;
    Ok(())
}
