// =============================================================================
// WebSocket handler — `/api/ws/stream` subscriber registration
// =============================================================================
//
// Grounded on the teacher's `ws_handler`/`handle_ws_connection` split (upgrade
// then a dedicated connection task) with the push direction inverted: instead
// of polling a version counter every 500ms, the connection forwards whatever
// the broadcaster fans out to this subscriber's own bounded channel. Inbound
// client frames carry no application meaning on this read-only stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::app_state::AppState;
use crate::outbound::OutboundFrame;

pub async fn handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut subscription) = state.broadcaster.subscribe(&state.metrics);

    if send_frame(&mut sender, OutboundFrame::hello()).await.is_err() {
        state.broadcaster.unsubscribe(id, &state.metrics);
        return;
    }

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut sender, frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Read-only stream: any other inbound frame is ignored.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "subscriber socket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.broadcaster.unsubscribe(id, &state.metrics);
}

async fn send_frame(sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), frame: OutboundFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(&frame).expect("OutboundFrame always serializes");
    sender.send(Message::Text(text)).await
}
