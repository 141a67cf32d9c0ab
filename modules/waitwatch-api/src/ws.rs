use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use waitwatch_common::ObservedValueEvent;

use crate::AppState;

/// Wire shape of one pushed update.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushMessage<'a> {
    ObservedValueUpdate(EventData<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData<'a> {
    pub identifier: &'a str,
    pub new_value: &'a str,
    pub is_live: bool,
}

impl<'a> From<&'a ObservedValueEvent> for PushMessage<'a> {
    fn from(e: &'a ObservedValueEvent) -> Self {
        Self::ObservedValueUpdate(EventData {
            identifier: &e.identifier,
            new_value: &e.new_value,
            is_live: e.is_live,
        })
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

/// Relay broadcast events until either side goes away. Inbound frames other
/// than close are ignored.
async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<ObservedValueEvent>) {
    debug!("WebSocket subscriber connected");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&PushMessage::from(&event)) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode push message");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("WebSocket subscriber disconnected");
}
