// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket remote store using tokio-tungstenite.
//!
//! Requests (query/mutate) each use a short-lived connection and wait for
//! the reply carrying their request id. Every channel subscription owns one
//! long-lived connection for its join and change stream.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use vigil_core::protocol::{ClientMessage, ServerMessage};
use vigil_core::{Binding, Filter, Operation, Table};

use crate::remote::{
    ChannelHandle, ChannelState, EventSink, RemoteFuture, RemoteStore, TransportError,
    TransportResult,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Remote store reached over WebSocket.
pub struct WebSocketRemote {
    url: String,
    next_id: AtomicU64,
}

impl WebSocketRemote {
    pub fn new(url: impl Into<String>) -> Self {
        WebSocketRemote {
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one request and waits for the reply with the same id.
    async fn request(&self, msg: ClientMessage, id: u64) -> TransportResult<ServerMessage> {
        let mut ws = connect(&self.url).await?;
        send(&mut ws, &msg).await?;

        let reply = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let reply: ServerMessage = serde_json::from_str(&text)
                        .map_err(|e| TransportError::SerializationError(e.to_string()))?;
                    if reply.request_id() == Some(id) {
                        break reply;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        };

        let _ = ws.close(None).await;
        Ok(reply)
    }
}

async fn connect(url: &str) -> TransportResult<WsStream> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    Ok(ws)
}

async fn send(ws: &mut WsStream, msg: &ClientMessage) -> TransportResult<()> {
    let json = msg
        .to_json()
        .map_err(|e| TransportError::SerializationError(e.to_string()))?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

impl RemoteStore for WebSocketRemote {
    fn query(&self, table: Table, filter: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            let id = self.next_id();
            match self.request(ClientMessage::query(id, table, filter), id).await? {
                ServerMessage::Rows { rows, .. } => Ok(rows),
                ServerMessage::Error { message, .. } => Err(TransportError::Rejected(message)),
                other => Err(TransportError::ReceiveFailed(format!(
                    "unexpected reply to query: {:?}",
                    other
                ))),
            }
        })
    }

    fn mutate(&self, table: Table, op: Operation, payload: Value) -> RemoteFuture<'_, Option<Value>> {
        Box::pin(async move {
            let id = self.next_id();
            match self
                .request(ClientMessage::mutate(id, table, op, payload), id)
                .await?
            {
                ServerMessage::Row { row, .. } => Ok(row),
                ServerMessage::Error { message, .. } => Err(TransportError::Rejected(message)),
                other => Err(TransportError::ReceiveFailed(format!(
                    "unexpected reply to mutate: {:?}",
                    other
                ))),
            }
        })
    }

    fn subscribe(&self, topic: &str, bindings: Vec<Binding>, sink: EventSink) -> ChannelHandle {
        let (state_tx, state_rx) = watch::channel(ChannelState::Joining);
        let cancel = CancellationToken::new();

        tokio::spawn(run_channel(
            self.url.clone(),
            topic.to_string(),
            bindings,
            sink,
            state_tx,
            cancel.clone(),
        ));

        ChannelHandle::new(state_rx, cancel)
    }
}

/// Drives one channel connection until it closes, errors or is cancelled.
async fn run_channel(
    url: String,
    topic: String,
    bindings: Vec<Binding>,
    sink: EventSink,
    state: watch::Sender<ChannelState>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            state.send_replace(ChannelState::Closed);
            return;
        }
        result = connect(&url) => result,
    };

    let mut ws = match connected {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(topic = %topic, "channel connect failed: {}", e);
            state.send_replace(ChannelState::Errored);
            return;
        }
    };

    if let Err(e) = send(&mut ws, &ClientMessage::join(topic.clone(), bindings.clone())).await {
        tracing::warn!(topic = %topic, "channel join send failed: {}", e);
        state.send_replace(ChannelState::Errored);
        return;
    }

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send(&mut ws, &ClientMessage::Leave { topic: topic.clone() }).await;
                let _ = ws.close(None).await;
                state.send_replace(ChannelState::Closed);
                return;
            }
            frame = ws.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let msg: ServerMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(topic = %topic, "skipping malformed frame: {}", e);
                        continue;
                    }
                };
                match msg {
                    ServerMessage::Joined { .. } => {
                        state.send_replace(ChannelState::Joined);
                    }
                    ServerMessage::Error { id: None, message } => {
                        tracing::warn!(topic = %topic, "channel rejected: {}", message);
                        state.send_replace(ChannelState::Errored);
                        let _ = ws.close(None).await;
                        return;
                    }
                    other => {
                        if let Some(event) = other.into_change_event() {
                            if bindings.iter().any(|b| b.accepts(&event)) && sink.send(event).is_err() {
                                // Engine is gone.
                                state.send_replace(ChannelState::Closed);
                                return;
                            }
                        }
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                state.send_replace(ChannelState::Closed);
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(topic = %topic, "channel receive failed: {}", e);
                state.send_replace(ChannelState::Errored);
                return;
            }
        }
    }
}
