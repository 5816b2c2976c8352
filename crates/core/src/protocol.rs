// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages between the engine and the remote store.
//!
//! The protocol is simple:
//! - Client sends queries, mutations and channel joins, each request tagged
//!   with a client-chosen id echoed in the reply
//! - Server replies to requests and pushes change events on joined channels
//!
//! The alert backend's broadcaster also pushes bare `NEW_COMMENT` and
//! `NOTIFICATION_UPDATED` envelopes; these are accepted on any channel and
//! mapped onto the equivalent change event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Binding, ChangeEvent, Filter, Operation, Table};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Fetch rows matching every filter.
    Query {
        id: u64,
        table: Table,
        #[serde(default)]
        filter: Vec<Filter>,
    },

    /// Insert, update or delete one row.
    Mutate {
        id: u64,
        table: Table,
        op: Operation,
        payload: Value,
    },

    /// Start receiving change events for the bindings under `topic`.
    Join { topic: String, bindings: Vec<Binding> },

    /// Stop receiving change events for `topic`.
    Leave { topic: String },

    /// Keepalive.
    Ping { id: u64 },
}

impl ClientMessage {
    pub fn query(id: u64, table: Table, filter: Vec<Filter>) -> Self {
        ClientMessage::Query { id, table, filter }
    }

    pub fn mutate(id: u64, table: Table, op: Operation, payload: Value) -> Self {
        ClientMessage::Mutate {
            id,
            table,
            op,
            payload,
        }
    }

    pub fn join(topic: impl Into<String>, bindings: Vec<Binding>) -> Self {
        ClientMessage::Join {
            topic: topic.into(),
            bindings,
        }
    }

    pub fn ping(id: u64) -> Self {
        ClientMessage::Ping { id }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a Query.
    Rows { id: u64, rows: Vec<Value> },

    /// Reply to a Mutate. `row` is the stored row, absent for deletes.
    Row {
        id: u64,
        #[serde(default)]
        row: Option<Value>,
    },

    /// A request failed, or the channel join was rejected when `id` is absent.
    Error {
        #[serde(default)]
        id: Option<u64>,
        message: String,
    },

    /// The channel join succeeded.
    Joined { topic: String },

    /// A row mutation on a joined channel.
    Change { topic: String, event: ChangeEvent },

    /// Reply to a Ping.
    Pong { id: u64 },

    /// Backend broadcast for a freshly added comment.
    #[serde(rename = "NEW_COMMENT")]
    NewComment { payload: Value },

    /// Backend broadcast carrying the full updated notification.
    #[serde(rename = "NOTIFICATION_UPDATED")]
    NotificationUpdated { payload: Value },
}

impl ServerMessage {
    /// Id of the request this message answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::Rows { id, .. } | ServerMessage::Row { id, .. } => Some(*id),
            ServerMessage::Error { id, .. } => *id,
            ServerMessage::Pong { id } => Some(*id),
            _ => None,
        }
    }

    /// The change event carried by this message, if any.
    pub fn into_change_event(self) -> Option<ChangeEvent> {
        match self {
            ServerMessage::Change { event, .. } => Some(event),
            ServerMessage::NewComment { payload } => {
                Some(ChangeEvent::insert(Table::Comments, payload))
            }
            ServerMessage::NotificationUpdated { payload } => {
                Some(ChangeEvent::update(Table::Notifications, payload))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
