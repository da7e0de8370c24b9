use super::codec::ControlFrame;
use super::AppState;
use crate::replay::{ReplayScheduler, SessionOutcome};
use crate::session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue depth of the market channel
const MARKET_BUFFER: usize = 64;

/// Public market-data channel
pub async fn kline_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_kline(socket, state))
}

/// Private account-update channel
pub async fn private_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_private(socket, state))
}

async fn handle_kline(socket: WebSocket, state: AppState) {
    let session = state.sessions.acquire();
    let (mut sender, mut receiver) = socket.split();

    let feed = match session.take_feed() {
        Some(feed) => feed,
        None => {
            warn!(session = %session.id(), "Market channel already attached, closing");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(session = %session.id(), "Market channel connected");

    let (market_tx, mut market_rx) = mpsc::channel::<String>(MARKET_BUFFER);
    let (control_tx, mut control_rx) = mpsc::channel::<String>(8);

    // Control frames are answered here so upstream fetches never delay a pong
    let reader_session = session.clone();
    let codec = state.codec.clone();
    let read_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if codec.decode_control(text.as_str()) == ControlFrame::Ping {
                        match codec.encode_pong() {
                            Ok(pong) => {
                                if control_tx.send(pong).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to encode pong: {}", e),
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(session = %reader_session.id(), "Market channel closed by client");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(session = %reader_session.id(), "Market channel receive error: {}", e);
                    break;
                }
            }
        }
        reader_session.terminate();
    });

    let write_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = control_rx.recv() => text,
                maybe = market_rx.recv() => match maybe {
                    Some(text) => text,
                    None => break,
                },
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let scheduler = ReplayScheduler::new(
        feed,
        session.clone(),
        state.codec.clone(),
        market_tx,
        state.replay.clone(),
    );
    let outcome = scheduler.run().await;

    // Scheduler dropped its sender; the writer drains what is queued then closes
    let _ = write_task.await;
    read_task.abort();

    info!(session = %session.id(), ?outcome, "Market channel finished");

    if outcome == SessionOutcome::Exhausted && state.exit_on_exhaustion {
        info!("Replay window exhausted, shutting down");
        state.shutdown.cancel();
    }
}

async fn handle_private(socket: WebSocket, state: AppState) {
    let session = state.sessions.acquire();
    let (mut sender, mut receiver) = socket.split();

    // The first client message is the handshake, whatever its content
    match receiver.next().await {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
            debug!(session = %session.id(), "Private channel closed before handshake");
            session.terminate();
            return;
        }
        Some(Ok(_)) => {}
    }

    let ack = match state.codec.encode_auth_ack() {
        Ok(ack) => ack,
        Err(e) => {
            warn!("Failed to encode auth ack: {}", e);
            session.terminate();
            return;
        }
    };
    if sender.send(Message::Text(ack.into())).await.is_err() {
        session.terminate();
        return;
    }

    let updates = session.updates();
    let mut updates = match updates.try_lock_owned() {
        Ok(updates) => updates,
        Err(_) => {
            warn!(session = %session.id(), "Private channel already attached, closing");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(session = %session.id(), "Private channel connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if state.codec.decode_control(text.as_str()) == ControlFrame::Ping
                        && !send_encoded(&mut sender, state.codec.encode_pong()).await
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session = %session.id(), "Private channel closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session = %session.id(), "Private channel receive error: {}", e);
                    break;
                }
            },
            signal = updates.recv() => {
                if signal.is_none() {
                    break;
                }
                if !send_position(&mut sender, &state, &session).await {
                    break;
                }
            }
            _ = session.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        }
    }

    session.terminate();
}

async fn send_position(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    session: &Arc<Session>,
) -> bool {
    let snapshot = session.snapshot();
    debug!(session = %session.id(), side = ?snapshot.side, size = %snapshot.size, "Position update");
    send_encoded(sender, state.codec.encode_position_event(&snapshot)).await
}

/// Send an encoded frame; encode errors drop the frame, send errors end the channel
async fn send_encoded(
    sender: &mut SplitSink<WebSocket, Message>,
    encoded: crate::Result<String>,
) -> bool {
    match encoded {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Dropping outbound frame: {}", e);
            true
        }
    }
}
