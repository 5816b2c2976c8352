// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection health state machine.
//!
//! ```text
//!   Active ──(no joined channels)──▶ Degraded ──▶ Reconnecting ──▶ Active
//!                                       ▲              │
//!                                       └──(retry)─────┤ (ceiling reached)
//!                                                      ▼
//!                                   Active ◀── FullResync ◀── Failed
//! ```
//!
//! The monitor performs no I/O. Every input returns a [`HealthAction`]
//! telling the engine what to do next; the engine reports the outcome back
//! through `on_reconnect_finished` or `on_resync_finished`. While a
//! reconnect or resync is in progress every other trigger is ignored, so
//! two cycles never overlap.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::remote::ChannelState;

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Failed reconnect cycles before escalating to a full resync.
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Being hidden longer than this forces a full resync when visible again.
    pub hidden_resync_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            hidden_resync_threshold: Duration::from_secs(30),
        }
    }
}

/// Supervisor state over the whole channel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Active,
    Degraded,
    Reconnecting,
    Failed,
    FullResync,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Active => "active",
            HealthState::Degraded => "degraded",
            HealthState::Reconnecting => "reconnecting",
            HealthState::Failed => "failed",
            HealthState::FullResync => "full_resync",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Environment change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSignal {
    VisibilityChanged { visible: bool },
    FocusGained,
    Online,
    Offline,
}

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    /// Close and reopen every registered channel.
    Reconnect,
    /// Discard derived state, refetch a snapshot, rebuild channels.
    FullResync,
    /// Call `on_retry_due` after the delay.
    RetryAfter(Duration),
}

/// Channel counts at the moment of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Liveness {
    pub joined: usize,
    pub registered: usize,
}

impl Liveness {
    pub fn new(joined: usize, registered: usize) -> Self {
        Liveness { joined, registered }
    }

    /// Channels are registered but none is joined.
    pub fn is_dead(&self) -> bool {
        self.registered > 0 && self.joined == 0
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub state: HealthState,
    pub attempts: u32,
}

/// Reconnection supervisor.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    state: HealthState,
    attempts: u32,
    backoff: Duration,
    visible: bool,
    online: bool,
    hidden_since: Option<Instant>,
    in_progress: bool,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let backoff = config.initial_backoff;
        HealthMonitor {
            config,
            state: HealthState::Active,
            attempts: 0,
            backoff,
            visible: true,
            online: true,
            hidden_since: None,
            in_progress: false,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            state: self.state,
            attempts: self.attempts,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// True while a reconnect or resync cycle is running.
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    fn set_state(&mut self, state: HealthState) {
        if self.state != state {
            tracing::info!(from = %self.state, to = %state, attempts = self.attempts, "health state changed");
            self.state = state;
        }
    }

    fn recovered(&mut self) {
        self.attempts = 0;
        self.backoff = self.config.initial_backoff;
        self.set_state(HealthState::Active);
    }

    fn next_backoff(&mut self) -> Duration {
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.config.max_backoff);
        delay
    }

    fn start_reconnect(&mut self) -> HealthAction {
        self.attempts += 1;
        self.in_progress = true;
        self.set_state(HealthState::Reconnecting);
        tracing::info!(attempt = self.attempts, "reconnecting channels");
        HealthAction::Reconnect
    }

    fn start_resync(&mut self) -> HealthAction {
        self.in_progress = true;
        self.set_state(HealthState::FullResync);
        HealthAction::FullResync
    }

    /// Marks the engine as failed before any channel exists, e.g. when the
    /// initial snapshot could not be fetched.
    pub fn mark_failed(&mut self) -> HealthAction {
        self.in_progress = false;
        self.set_state(HealthState::Failed);
        HealthAction::RetryAfter(self.next_backoff())
    }

    fn probe(&mut self, liveness: Liveness) -> HealthAction {
        if self.in_progress {
            return HealthAction::None;
        }
        match self.state {
            HealthState::Failed => self.start_resync(),
            _ if liveness.is_dead() => {
                self.set_state(HealthState::Degraded);
                self.start_reconnect()
            }
            HealthState::Degraded if liveness.joined > 0 => {
                self.recovered();
                HealthAction::None
            }
            _ => HealthAction::None,
        }
    }

    /// Periodic liveness check. Does nothing while hidden.
    pub fn on_tick(&mut self, liveness: Liveness) -> HealthAction {
        if !self.visible {
            return HealthAction::None;
        }
        self.probe(liveness)
    }

    /// Reacts to a host environment change.
    pub fn on_signal(&mut self, signal: EnvSignal, liveness: Liveness) -> HealthAction {
        match signal {
            EnvSignal::VisibilityChanged { visible: false } => {
                self.visible = false;
                if self.hidden_since.is_none() {
                    self.hidden_since = Some(Instant::now());
                }
                HealthAction::None
            }
            EnvSignal::VisibilityChanged { visible: true } => {
                self.visible = true;
                let hidden_for = self.hidden_since.take().map(|since| since.elapsed());
                if self.in_progress {
                    return HealthAction::None;
                }
                match hidden_for {
                    Some(hidden_for) if hidden_for > self.config.hidden_resync_threshold => {
                        tracing::info!(?hidden_for, "visible after long inactivity, resyncing");
                        self.start_resync()
                    }
                    _ => self.probe(liveness),
                }
            }
            EnvSignal::FocusGained => self.probe(liveness),
            EnvSignal::Online => {
                self.online = true;
                self.probe(liveness)
            }
            EnvSignal::Offline => {
                self.online = false;
                HealthAction::None
            }
        }
    }

    /// A channel changed state outside of a reconnect cycle.
    pub fn on_channel_transition(&mut self, state: ChannelState, liveness: Liveness) -> HealthAction {
        if self.in_progress {
            return HealthAction::None;
        }
        match (self.state, state) {
            (HealthState::Degraded, ChannelState::Joined) => self.recovered(),
            (HealthState::Active, ChannelState::Errored | ChannelState::Closed)
                if liveness.is_dead() =>
            {
                self.set_state(HealthState::Degraded);
            }
            _ => {}
        }
        HealthAction::None
    }

    /// Reports the outcome of a reconnect cycle.
    pub fn on_reconnect_finished(&mut self, joined: bool) -> HealthAction {
        self.in_progress = false;
        if joined {
            self.recovered();
            return HealthAction::None;
        }
        if self.attempts >= self.config.max_reconnect_attempts {
            tracing::warn!(attempts = self.attempts, "reconnect ceiling reached");
            self.set_state(HealthState::Failed);
            self.attempts = 0;
            return self.start_resync();
        }
        self.set_state(HealthState::Degraded);
        HealthAction::RetryAfter(self.next_backoff())
    }

    /// A backoff delay requested by `RetryAfter` has elapsed.
    pub fn on_retry_due(&mut self, liveness: Liveness) -> HealthAction {
        if self.in_progress {
            return HealthAction::None;
        }
        match self.state {
            HealthState::Failed => self.start_resync(),
            _ if liveness.joined > 0 => {
                self.recovered();
                HealthAction::None
            }
            _ => self.start_reconnect(),
        }
    }

    /// Reports the outcome of a full resync.
    pub fn on_resync_finished(&mut self, ok: bool) -> HealthAction {
        self.in_progress = false;
        if ok {
            self.recovered();
            return HealthAction::None;
        }
        self.set_state(HealthState::Failed);
        HealthAction::RetryAfter(self.next_backoff())
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
