// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-key delayed tasks.
//!
//! At most one task is scheduled per key. Scheduling again under the same
//! key cancels the earlier task before it fires. A task that has started
//! running is no longer scheduled and can't be cancelled through the
//! scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Entry {
    generation: u64,
    timer: JoinHandle<()>,
    job: Job,
}

struct State<K> {
    entries: HashMap<K, Entry>,
    next_generation: u64,
}

/// Debounce-style scheduler keyed by `K`.
pub struct KeyedScheduler<K> {
    state: Arc<Mutex<State<K>>>,
}

impl<K> Clone for KeyedScheduler<K> {
    fn clone(&self) -> Self {
        KeyedScheduler {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K> Default for KeyedScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<K>(state: &Mutex<State<K>>) -> MutexGuard<'_, State<K>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K> KeyedScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        KeyedScheduler {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Runs `job` after `delay`, replacing any task pending under `key`.
    ///
    /// Returns true if an earlier task was cancelled.
    pub fn schedule<F>(&self, key: K, delay: Duration, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        state.next_generation += 1;
        let generation = state.next_generation;

        let shared = Arc::clone(&self.state);
        let timer_key = key.clone();
        // Spawned under the lock, so the timer can't look for its entry
        // before it is inserted.
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job = {
                let mut state = lock(&shared);
                match state.entries.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        state.entries.remove(&timer_key).map(|entry| entry.job)
                    }
                    _ => None,
                }
            };
            if let Some(job) = job {
                job.await;
            }
        });

        let previous = state.entries.insert(
            key,
            Entry {
                generation,
                timer,
                job: Box::pin(job),
            },
        );
        match previous {
            Some(previous) => {
                previous.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels the task pending under `key`. Returns true if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = lock(&self.state).entries.remove(key);
        match removed {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Runs the task pending under `key` now instead of waiting for its
    /// delay.
    pub fn flush(&self, key: &K) -> Option<JoinHandle<()>> {
        let entry = lock(&self.state).entries.remove(key)?;
        entry.timer.abort();
        Some(tokio::spawn(entry.job))
    }

    /// Cancels every pending task.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = lock(&self.state).entries.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.timer.abort();
        }
        drained.len()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        lock(&self.state).entries.contains_key(key)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
