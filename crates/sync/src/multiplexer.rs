// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Named channel registry.
//!
//! Every channel feeds its change events into one shared sink. Join state
//! transitions are forwarded on a separate stream for the health monitor.
//! A channel that errors stays registered until it is closed or replaced.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vigil_core::Binding;

use crate::remote::{ChannelHandle, ChannelState, EventSink, SharedRemote};

/// A join state change reported by one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTransition {
    pub name: String,
    pub state: ChannelState,
}

struct Registered {
    bindings: Vec<Binding>,
    handle: ChannelHandle,
    forwarder: JoinHandle<()>,
}

impl Registered {
    fn shut(self) {
        self.forwarder.abort();
        self.handle.close();
    }
}

/// Owns every open channel.
pub struct ChannelMultiplexer {
    remote: SharedRemote,
    sink: EventSink,
    transitions: mpsc::UnboundedSender<ChannelTransition>,
    channels: BTreeMap<String, Registered>,
}

impl ChannelMultiplexer {
    pub fn new(
        remote: SharedRemote,
        sink: EventSink,
        transitions: mpsc::UnboundedSender<ChannelTransition>,
    ) -> Self {
        ChannelMultiplexer {
            remote,
            sink,
            transitions,
            channels: BTreeMap::new(),
        }
    }

    /// Opens a channel, closing any channel already registered under `name`.
    pub fn open(&mut self, name: &str, bindings: Vec<Binding>) -> ChannelState {
        if let Some(previous) = self.channels.remove(name) {
            tracing::debug!(channel = name, "replacing open channel");
            previous.shut();
        }

        let handle = self
            .remote
            .subscribe(name, bindings.clone(), self.sink.clone());
        let state = handle.state();

        let mut watch = handle.watch();
        let transitions = self.transitions.clone();
        let channel = name.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                let state = *watch.borrow_and_update();
                let transition = ChannelTransition {
                    name: channel.clone(),
                    state,
                };
                if transitions.send(transition).is_err() || watch.changed().await.is_err() {
                    return;
                }
            }
        });

        tracing::info!(channel = name, %state, "channel opened");
        self.channels.insert(
            name.to_string(),
            Registered {
                bindings,
                handle,
                forwarder,
            },
        );
        state
    }

    /// Closes and unregisters a channel. Returns false if none was open.
    pub fn close(&mut self, name: &str) -> bool {
        match self.channels.remove(name) {
            Some(registered) => {
                registered.shut();
                tracing::info!(channel = name, "channel closed");
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        let count = self.channels.len();
        for (_, registered) in std::mem::take(&mut self.channels) {
            registered.shut();
        }
        if count > 0 {
            tracing::info!(count, "all channels closed");
        }
    }

    /// Closes and reopens every registered channel with its bindings.
    pub fn reopen_all(&mut self) {
        let specs: Vec<(String, Vec<Binding>)> = self
            .channels
            .iter()
            .map(|(name, registered)| (name.clone(), registered.bindings.clone()))
            .collect();
        self.close_all();
        for (name, bindings) in specs {
            self.open(&name, bindings);
        }
    }

    pub fn list_states(&self) -> BTreeMap<String, ChannelState> {
        self.channels
            .iter()
            .map(|(name, registered)| (name.clone(), registered.handle.state()))
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ChannelState> {
        self.channels.get(name).map(|r| r.handle.state())
    }

    pub fn bindings(&self, name: &str) -> Option<&[Binding]> {
        self.channels.get(name).map(|r| r.bindings.as_slice())
    }

    pub fn joined_count(&self) -> usize {
        self.channels
            .values()
            .filter(|r| r.handle.state() == ChannelState::Joined)
            .count()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        for (_, registered) in std::mem::take(&mut self.channels) {
            registered.shut();
        }
    }
}

#[cfg(test)]
#[path = "multiplexer_tests.rs"]
mod tests;
