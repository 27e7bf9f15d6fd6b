//! The axum WebSocket upgrade handler: pairs one physical socket with one
//! [`Orchestrator`], grounded on `api/ws.rs::handle_ws`'s split-socket,
//! `tokio::select!`-driven connection loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::orchestrator::{ClientSink, Orchestrator};
use crate::session::Session;
use crate::wire::{ClientFrame, ServerFrame, WireErrorKind};

const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;
const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// `ClientSink` backed by the outbound half of a split axum WebSocket.
/// Serializes frames to JSON text (events/errors) or forwards raw bytes as
/// binary frames (audio), over a channel so the orchestrator's background
/// tasks never touch the socket directly.
struct WsClientSink {
    outbound: mpsc::Sender<Message>,
}

#[async_trait]
impl ClientSink for WsClientSink {
    async fn send_frame(&self, frame: ServerFrame) {
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.outbound.send(Message::Text(text.into())).await;
        }
    }

    async fn send_binary(&self, bytes: Bytes) {
        let _ = self.outbound.send(Message::Binary(bytes)).await;
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Sends a well-formed error frame to the client instead of silently
/// dropping a malformed or out-of-sequence message (spec §8: a client
/// mistake gets an error frame, never a crash or a dropped message).
async fn send_error_frame(
    outbound_tx: &mpsc::Sender<Message>,
    error: WireErrorKind,
    message: impl Into<String>,
) {
    if let Ok(text) = serde_json::to_string(&ServerFrame::error(error, message)) {
        let _ = outbound_tx.send(Message::Text(text.into())).await;
    }
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);

    // Drains the outbound channel into the socket on its own task so the
    // orchestrator's forwarders never block waiting on the socket directly.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let sink: Arc<dyn ClientSink> = Arc::new(WsClientSink { outbound: outbound_tx.clone() });
    let mut orchestrator: Option<Arc<Orchestrator>> = None;
    let mut last_activity = Instant::now();

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Init { metadata }) => {
                                if orchestrator.is_some() {
                                    send_error_frame(
                                        &outbound_tx,
                                        WireErrorKind::InitError,
                                        "session already initialized",
                                    )
                                    .await;
                                    continue;
                                }
                                let built = init_orchestrator(&state, metadata, Arc::clone(&sink)).await;
                                orchestrator = built;
                            }
                            Ok(ClientFrame::Metadata { metadata }) => {
                                if let Some(ref o) = orchestrator {
                                    o.handle_metadata(metadata);
                                }
                            }
                            Err(e) => {
                                send_error_frame(
                                    &outbound_tx,
                                    WireErrorKind::MessageProcessingError,
                                    e.to_string(),
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(ref o) = orchestrator {
                            o.handle_audio(bytes).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[Ws] heartbeat timeout, closing connection");
                    break;
                }
            }
        }
    }

    if let Some(o) = orchestrator {
        o.teardown().await;
        state.registry.remove(o.session_id());
    }
    drop(outbound_tx);
    let _ = writer.await;
}

async fn init_orchestrator(
    state: &AppState,
    metadata: std::collections::HashMap<String, String>,
    sink: Arc<dyn ClientSink>,
) -> Option<Arc<Orchestrator>> {
    let session = Arc::new(Session::new(state.config.max_history_messages));
    session.metadata.lock().extend(metadata);

    let stt = state.providers.build_stt();
    let llm = state.providers.build_llm();
    let tts = state.providers.build_tts();

    let orchestrator = Orchestrator::new(
        Arc::clone(&session),
        stt,
        llm,
        tts,
        sink,
        state.spawner.clone(),
        state.config.retain_interrupted_turns,
    );

    let voice_id = session.metadata.lock().get("voiceId").cloned();
    if orchestrator.init(voice_id).await.is_err() {
        return None;
    }

    state.registry.insert(session);
    Some(orchestrator)
}
