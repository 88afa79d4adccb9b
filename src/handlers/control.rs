//! # WebSocket Control Channel
//!
//! This module provides the WebSocket interface clients use to observe and
//! drive the resource cache lifecycle.
//!
//! ## WebSocket API
//!
//! **Incoming Messages:**
//! - `{"type": "PING"}` - Liveness check
//! - `{"type": "SKIP_WAITING"}` - Activate the installed namespace immediately
//!
//! **Outgoing Messages:**
//! - `{"type": "PONG", "version": "1.0.0"}` - Answer to a ping
//! - `{"type": "READY", "version": "1.0.0"}` - A namespace went live; sent to
//!   every connected client, not just the one that asked
//! - `{"type": "ERROR", "message": "..."}` - Malformed message or failed command
//!
//! ## JavaScript Client Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8780/ws');
//!
//! ws.onmessage = (event) => {
//!   const message = JSON.parse(event.data);
//!   switch (message.type) {
//!     case 'PONG':
//!       console.log('Gateway is up, version', message.version);
//!       break;
//!     case 'READY':
//!       // The new asset generation is live; reload to pick it up.
//!       window.location.reload();
//!       break;
//!     case 'ERROR':
//!       console.error('Control error:', message.message);
//!       break;
//!   }
//! };
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({ type: 'PING' }));
//!   ws.send(JSON.stringify({ type: 'SKIP_WAITING' }));
//! };
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::core::lifecycle::{LifecycleController, LifecycleEvent};
use crate::state::AppState;

/// Control messages sent by clients.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

/// Control messages sent to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "PONG")]
    Pong { version: String },
    #[serde(rename = "READY")]
    Ready { version: String },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

/// Upgrades the HTTP connection to the WebSocket control channel.
pub async fn ws_control_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("WebSocket control connection upgrade requested");
    let lifecycle = state.lifecycle.clone();
    ws.on_upgrade(move |socket| handle_control_socket(socket, lifecycle))
}

/// Manages one control session: answers commands and relays lifecycle
/// broadcasts until the client hangs up.
async fn handle_control_socket(socket: WebSocket, lifecycle: LifecycleController) {
    info!("WebSocket control connection established");

    let (mut sender, mut receiver) = socket.split();

    // Channel for outgoing messages
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    // Spawn task to handle outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let json_message = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize outgoing message: {}", e);
                    continue;
                }
            };

            if let Err(e) = sender.send(Message::Text(json_message.into())).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    // Spawn task to relay lifecycle broadcasts to this client
    let events_task = {
        let outgoing_tx = outgoing_tx.clone();
        let mut events = lifecycle.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Ready { version }) => {
                        let _ = outgoing_tx.send(OutgoingMessage::Ready { version });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Control client lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    // Process incoming messages
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(msg) => {
                let should_continue = process_message(msg, &lifecycle, &outgoing_tx).await;
                if !should_continue {
                    break;
                }
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    sender_task.abort();
    events_task.abort();

    info!("WebSocket control connection terminated");
}

/// Process one incoming WebSocket message
async fn process_message(
    msg: Message,
    lifecycle: &LifecycleController,
    outgoing_tx: &mpsc::UnboundedSender<OutgoingMessage>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received control message: {}", text);

            let incoming_msg: IncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    let _ = outgoing_tx.send(OutgoingMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    });
                    return true;
                }
            };

            handle_incoming_message(incoming_msg, lifecycle, outgoing_tx).await
        }
        Message::Binary(_) => {
            let _ = outgoing_tx.send(OutgoingMessage::Error {
                message: "The control channel accepts text messages only".to_string(),
            });
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("WebSocket connection closed by client");
            false
        }
    }
}

/// Handle parsed incoming message
async fn handle_incoming_message(
    msg: IncomingMessage,
    lifecycle: &LifecycleController,
    outgoing_tx: &mpsc::UnboundedSender<OutgoingMessage>,
) -> bool {
    match msg {
        IncomingMessage::Ping => {
            match lifecycle.ping().await {
                Ok(version) => {
                    let _ = outgoing_tx.send(OutgoingMessage::Pong { version });
                }
                Err(e) => {
                    error!("Lifecycle ping failed: {}", e);
                    let _ = outgoing_tx.send(OutgoingMessage::Error {
                        message: format!("Ping failed: {}", e),
                    });
                }
            }
            true
        }
        IncomingMessage::SkipWaiting => {
            // The resulting READY is delivered through the broadcast relay,
            // so every connected client hears about it at once.
            if let Err(e) = lifecycle.skip_waiting().await {
                error!("Activation failed: {}", e);
                let _ = outgoing_tx.send(OutgoingMessage::Error {
                    message: format!("Activation failed: {}", e),
                });
            }
            true
        }
    }
}
