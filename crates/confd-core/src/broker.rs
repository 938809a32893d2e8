// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed multi-waiter notification broker.
//!
//! Parks long-poll requests against a topic (`app_{id}` or
//! `key_{id}_{key}`) and wakes every parked waiter on `push`. Fan-out is
//! one-shot: a pushed topic is removed in its entirety, so re-arming is
//! the caller's responsibility on its next request (which also carries a
//! fresh `lastIndex`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::oneshot;

/// Format the app-watch topic for an application id.
pub fn app_topic(app_id: i64) -> String {
    format!("app_{app_id}")
}

/// Format the key-watch topic for an application id and key.
pub fn key_topic(app_id: i64, key: &str) -> String {
    format!("key_{app_id}_{key}")
}

/// Parse a topic string back into `(app_id, key)`, where `key` is `None`
/// for app-watch topics. Returns `None` for anything not matching
/// `app_{id}` or `key_{id}_{...}` — the sweeper skips those.
pub fn parse_topic(topic: &str) -> Option<(i64, Option<String>)> {
    if let Some(rest) = topic.strip_prefix("app_") {
        let app_id = rest.parse().ok()?;
        return Some((app_id, None));
    }
    if let Some(rest) = topic.strip_prefix("key_") {
        let (app_id_str, key) = rest.split_once('_')?;
        let app_id = app_id_str.parse().ok()?;
        if key.is_empty() {
            return None;
        }
        return Some((app_id, Some(key.to_owned())));
    }
    None
}

/// A handle to a parked long-poll request.
pub struct Waiter {
    id: u64,
    topic: String,
    rx: oneshot::Receiver<Value>,
}

impl Waiter {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Await delivery. Resolves once `push` fans out on this waiter's
    /// topic, or never resolves if the broker drops the sender (which
    /// only happens via `cancel`, making this branch unreachable in
    /// practice once cancelled).
    pub async fn recv(&mut self) -> Option<Value> {
        (&mut self.rx).await.ok()
    }
}

/// Topic-keyed registry of waiter channels.
///
/// All operations are serialized by a single lock; `push` and `cancel`
/// take the write guard, `topics`/`has` the read guard. Every waiter
/// channel has capacity 1 and exactly one producer (the broker) and one
/// consumer (the waiter), so `push` never blocks while holding the lock.
pub struct NotificationBroker {
    waiters: RwLock<HashMap<String, IndexMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    /// `lastIndexByTopic`: written by the long-poll endpoint whenever a
    /// request parks, read by the reconciliation sweeper each tick.
    /// Kept as a sibling structure with its own lock rather than exposed
    /// as global mutable state.
    last_index_by_topic: RwLock<HashMap<String, i64>>,
}

impl Default for NotificationBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBroker {
    pub fn new() -> Self {
        Self {
            waiters: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_index_by_topic: RwLock::new(HashMap::new()),
        }
    }

    /// Record the `lastIndex` a client supplied when parking on `topic`.
    /// Never purged explicitly: a topic the broker no longer knows about
    /// is simply skipped by the sweeper, so a stale entry is harmless.
    pub fn record_last_index(&self, topic: &str, last_index: i64) {
        let mut map = match self.last_index_by_topic.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(topic.to_owned(), last_index);
    }

    /// The `lastIndex` last recorded for `topic`, if any request has
    /// parked on it.
    pub fn last_index(&self, topic: &str) -> Option<i64> {
        let map = match self.last_index_by_topic.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(topic).copied()
    }

    /// Park a new waiter against `topic`. Non-blocking.
    pub fn park(&self, topic: impl Into<String>) -> Waiter {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.lock_write();
        waiters.entry(topic.clone()).or_default().insert(id, tx);

        Waiter { id, topic, rx }
    }

    /// Deliver `payload` to every waiter parked on `topic`, then drop the
    /// topic entirely (one-shot semantics). Returns whether the topic
    /// existed.
    pub fn push(&self, topic: &str, payload: Value) -> bool {
        let mut waiters = self.lock_write();
        match waiters.remove(topic) {
            Some(parked) => {
                for (_, tx) in parked {
                    // Capacity-1, single consumer: send is infallible from the
                    // broker's perspective except when the waiter already
                    // dropped its receiver (client cancelled), which we ignore.
                    let _ = tx.send(payload.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Remove `waiter` from its topic's sequence. If the sequence becomes
    /// empty, the topic is dropped entirely. Idempotent: a waiter already
    /// removed by `push` or a prior `cancel` is a no-op.
    pub fn cancel(&self, waiter: &Waiter) {
        let mut waiters = self.lock_write();
        let Some(parked) = waiters.get_mut(&waiter.topic) else {
            return;
        };
        parked.swap_remove(&waiter.id);
        if parked.is_empty() {
            waiters.remove(&waiter.topic);
        }
    }

    /// Snapshot of every topic currently tracked, used by the sweeper.
    pub fn topics(&self) -> Vec<String> {
        self.lock_read().keys().cloned().collect()
    }

    /// Whether `topic` currently has at least one parked waiter.
    pub fn has(&self, topic: &str) -> bool {
        self.lock_read().contains_key(topic)
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, IndexMap<u64, oneshot::Sender<Value>>>> {
        match self.waiters.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, IndexMap<u64, oneshot::Sender<Value>>>> {
        match self.waiters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
