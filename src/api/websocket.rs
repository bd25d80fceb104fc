//! WebSocket feed of relay events
//!
//! Every connected client receives deployments, proposals, confirmations,
//! executions and confirmed messages as they happen.

use crate::api::handlers::ApiState;
use crate::crypto::{Address, H256};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Maximum number of events to buffer per subscriber
const BROADCAST_CAPACITY: usize = 100;

/// Events pushed to WebSocket clients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    SafeDeployed {
        address: Address,
        description: String,
    },
    TransactionProposed {
        safe: Address,
        safe_tx_hash: H256,
        nonce: u64,
        confirmations: usize,
        required: u32,
    },
    ConfirmationAdded {
        safe_tx_hash: H256,
        owner: Address,
        confirmations: usize,
        required: u32,
    },
    TransactionExecuted {
        safe: Address,
        safe_tx_hash: H256,
        tx_hash: H256,
        block_number: u64,
    },
    MessageConfirmed {
        safe: Address,
        message_hash: H256,
    },
    /// Connection established
    Connected { message: String },
}

/// Broadcaster for WebSocket events
#[derive(Debug)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsEvent>,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Send an event to all connected clients
    pub fn broadcast(&self, event: WsEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let broadcaster = state.ws_broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<WsBroadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = broadcaster.subscribe();

    let welcome = WsEvent::Connected {
        message: "Connected to Safe relay".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket client lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    log::debug!("Received text message: {}", text);
                }
                Err(e) => {
                    log::warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    log::info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_with_no_subscribers() {
        let broadcaster = WsBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.broadcast(WsEvent::Connected {
            message: "hi".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let broadcaster = WsBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let event = WsEvent::MessageConfirmed {
            safe: Address([1; 20]),
            message_hash: H256([2; 32]),
        };
        broadcaster.broadcast(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_event_serialization() {
        let event = WsEvent::TransactionExecuted {
            safe: Address([1; 20]),
            safe_tx_hash: H256([2; 32]),
            tx_hash: H256([3; 32]),
            block_number: 9,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TransactionExecuted\""));
        assert!(json.contains("\"block_number\":9"));
    }
}
