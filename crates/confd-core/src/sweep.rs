// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation sweeper: a background task that catches
//! releases whose broker push was missed — a waiter that parked between
//! a release's commit and its push, or a push that raced a crash.
//!
//! A single `tokio::spawn`ed loop, woken by a fixed `tokio::time::interval`
//! and cancellable via a shared `CancellationToken`. A fixed interval
//! stands in for an operator-configured schedule; no cron-style expression
//! parser is pulled in for something this small.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::{parse_topic, NotificationBroker};
use crate::store::ReleaseStore;

/// Spawn the sweeper. Returns immediately; the task runs until
/// `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: Arc<dyn ReleaseStore>,
    broker: Arc<NotificationBroker>,
    period: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            if let Err(err) = sweep_once(&*store, &broker).await {
                warn!(%err, "sweeper pass failed, will retry next tick");
            }
        }
    });
}

async fn sweep_once(store: &dyn ReleaseStore, broker: &NotificationBroker) -> Result<(), crate::error::ConfdError> {
    let topics = broker.topics();
    if topics.is_empty() {
        return Ok(());
    }

    let mut app_ids: Vec<i64> = Vec::new();
    for topic in &topics {
        if let Some((app_id, _)) = parse_topic(topic) {
            if !app_ids.contains(&app_id) {
                app_ids.push(app_id);
            }
        }
    }
    if app_ids.is_empty() {
        return Ok(());
    }

    let snapshots = store.snapshots_by_app(&app_ids).await?;
    let current_by_app: std::collections::HashMap<i64, i64> =
        snapshots.iter().map(|s| (s.app_id, s.release_index)).collect();

    for topic in &topics {
        let Some((app_id, key)) = parse_topic(topic) else { continue };
        let Some(&current_index) = current_by_app.get(&app_id) else { continue };

        // Topics without a recorded lastIndex are skipped: nobody has
        // parked with knowledge of an older index to reconcile against.
        let Some(last_seen) = broker.last_index(topic) else { continue };
        if current_index == last_seen {
            continue;
        }

        debug!(app_id, ?key, current_index, last_seen, "sweeper waking stale topic");
        broker.push(topic, serde_json::json!(current_index));
    }

    Ok(())
}
