// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Host control lines read from stdin.
//!
//! One command per line:
//! - `hidden` / `visible`: app visibility changed
//! - `focus`: app regained focus
//! - `online` / `offline`: network reachability changed
//! - `snooze <minutes>` / `unsnooze`
//! - `status`: log health and channel states

use chrono::{DateTime, Utc};
use vigil_sync::EnvSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Signal(EnvSignal),
    Snooze(chrono::Duration),
    Unsnooze,
    Status,
}

/// Parses one line. Returns `None` for anything unrecognized.
pub fn parse(line: &str) -> Option<Control> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let control = match command {
        "hidden" => Control::Signal(EnvSignal::VisibilityChanged { visible: false }),
        "visible" => Control::Signal(EnvSignal::VisibilityChanged { visible: true }),
        "focus" => Control::Signal(EnvSignal::FocusGained),
        "online" => Control::Signal(EnvSignal::Online),
        "offline" => Control::Signal(EnvSignal::Offline),
        "snooze" => {
            let minutes: i64 = words.next()?.parse().ok()?;
            if minutes <= 0 {
                return None;
            }
            Control::Snooze(chrono::Duration::try_minutes(minutes)?)
        }
        "unsnooze" => Control::Unsnooze,
        "status" => Control::Status,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(control)
}

/// End of a snooze starting at `now`, or `None` past the representable range.
pub fn snooze_deadline(now: DateTime<Utc>, duration: chrono::Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(duration)
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
