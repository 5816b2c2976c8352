// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! vigild - headless alert sync client.
//!
//! Mirrors the remote alert store for one actor and logs every alert that
//! passes delivery filtering. Host events are read from stdin (see
//! [`control`]).
//!
//! Usage:
//!   vigild --actor <id> [--config <path>] [--url <ws-url>] [--log-file <path>]

mod control;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use vigil_sync::{EngineEvent, Session, SyncConfig, SyncEngine, SyncResult, WebSocketRemote};

use control::Control;

/// vigild: Realtime alert sync client
#[derive(Parser, Debug)]
#[command(name = "vigild")]
#[command(about = "Keeps a local mirror of alerts, topics and sites in sync")]
struct Args {
    /// Actor the session runs for
    #[arg(short, long)]
    actor: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote store URL, overriding the configuration file
    #[arg(long)]
    url: Option<String>,

    /// Log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn resolve_config(args: &Args) -> SyncResult<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(args.log_file.as_deref());

    let config = resolve_config(&args)?;
    tracing::info!("vigild starting, actor={}, url={}", args.actor, config.url);

    let remote = Arc::new(WebSocketRemote::new(config.url.clone()));
    let engine = SyncEngine::start(config, Session::new(args.actor.clone()), remote, None).await?;
    let mut events = engine.take_events().ok_or("event stream unavailable")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&engine, &line),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    engine.stop().await;
    tracing::info!("vigild stopped");
    Ok(())
}

fn handle_line(engine: &SyncEngine, line: &str) {
    let Some(control) = control::parse(line) else {
        tracing::warn!("unrecognized command: {}", line.trim());
        return;
    };
    match control {
        Control::Signal(signal) => {
            if let Err(e) = engine.signal(signal) {
                tracing::warn!("signal not delivered: {}", e);
            }
        }
        Control::Snooze(duration) => match control::snooze_deadline(chrono::Utc::now(), duration) {
            Some(deadline) => engine.snooze_until(deadline),
            None => tracing::warn!("snooze too long: {} minutes", duration.num_minutes()),
        },
        Control::Unsnooze => engine.clear_snooze(),
        Control::Status => {
            let health = engine.health();
            tracing::info!(state = %health.state, attempts = health.attempts, "health");
            for (name, state) in engine.channel_states() {
                tracing::info!(channel = %name, %state, "channel");
            }
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Alert(n) => {
            tracing::info!(id = %n.id, severity = n.severity.as_str(), "alert: {}", n.title);
        }
        EngineEvent::MutationFailed { id, error } => {
            tracing::warn!(%id, "change reverted: {}", error);
        }
        EngineEvent::HealthChanged(state) => tracing::info!(%state, "health changed"),
        EngineEvent::ResyncCompleted => tracing::info!("resync completed"),
    }
}

fn setup_logging(log_path: Option<&Path>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Fall back to stderr if the log file can't be opened
    let file = log_path.and_then(|path| {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
