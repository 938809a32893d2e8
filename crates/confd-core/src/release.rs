// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The release coordinator: promotes staged edits through the store
//! and fans the result out on the notification broker.
//!
//! The store commit always precedes the broker pushes: a waiter woken by
//! `push` must observe the new release on its very next read.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::broker::{app_topic, key_topic, NotificationBroker};
use crate::error::ConfdResult;
use crate::model::ReleaseSnapshot;
use crate::store::ReleaseStore;

/// Promotes staged config to a new release and notifies parked waiters.
///
/// Cheap to clone: holds only an `Arc<dyn ReleaseStore>` and an
/// `Arc<NotificationBroker>`.
#[derive(Clone)]
pub struct ReleaseCoordinator {
    store: Arc<dyn ReleaseStore>,
    broker: Arc<NotificationBroker>,
}

impl ReleaseCoordinator {
    pub fn new(store: Arc<dyn ReleaseStore>, broker: Arc<NotificationBroker>) -> Self {
        Self { store, broker }
    }

    pub fn broker(&self) -> &Arc<NotificationBroker> {
        &self.broker
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.store
    }

    /// Promote every currently staged entry for `app_id` into a new
    /// release, then push `app_{id}` and every `key_{id}_{key}` topic the
    /// release touched. The store's transaction commits before any push,
    /// so a crash between commit and push only delays delivery — the
    /// reconciliation sweeper closes that gap on its own schedule.
    #[instrument(skip(self), fields(app_id, released_keys))]
    pub async fn release(&self, app_id: i64, operator: &str) -> ConfdResult<ReleaseSnapshot> {
        let outcome = self.store.release(app_id, operator).await?;
        tracing::Span::current().record("released_keys", outcome.affected_keys.len());

        let snapshot = self
            .store
            .current_snapshot(app_id)
            .await?
            .unwrap_or_else(|| panic_free_empty_snapshot(app_id));

        self.broker.push(&app_topic(app_id), serde_json::json!(snapshot.release_index));
        for key in &outcome.affected_keys {
            self.broker.push(&key_topic(app_id, key), serde_json::json!(snapshot.release_index));
        }

        info!(app_id, release_index = snapshot.release_index, touched = outcome.affected_keys.len(), "released");
        Ok(snapshot)
    }
}

/// A release transaction that just committed must have produced a
/// snapshot row; this only triggers on a logic bug elsewhere in the
/// store, not on any input the coordinator's callers control.
fn panic_free_empty_snapshot(app_id: i64) -> ReleaseSnapshot {
    ReleaseSnapshot { app_id, config: Vec::new(), release_time: chrono::Utc::now(), release_index: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::NotificationBroker;
    use crate::model::{Application, ConfigEntry, NewStagedEntry, ReleaseLogEntry, ReleaseOutcome, UpdateStagedEntry};
    use crate::store::{ListStagedQuery, Page};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// A minimal in-memory double standing in for Postgres, just enough
    /// to exercise the coordinator's fan-out logic in isolation.
    struct FakeStore {
        snapshot: Mutex<Option<ReleaseSnapshot>>,
        outcome: ReleaseOutcome,
    }

    #[async_trait]
    impl ReleaseStore for FakeStore {
        async fn create_app(&self, _: &str, _: &str, _: &str) -> ConfdResult<Application> {
            unimplemented!()
        }
        async fn get_app(&self, _: i64) -> ConfdResult<Option<Application>> {
            unimplemented!()
        }
        async fn get_app_by_token(&self, _: &str) -> ConfdResult<Option<Application>> {
            unimplemented!()
        }
        async fn delete_app(&self, _: i64) -> ConfdResult<()> {
            unimplemented!()
        }
        async fn list_staged(&self, _: i64, _: &ListStagedQuery) -> ConfdResult<Page<ConfigEntry>> {
            unimplemented!()
        }
        async fn get_staged(&self, _: i64, _: i64) -> ConfdResult<Option<ConfigEntry>> {
            unimplemented!()
        }
        async fn create_staged(&self, _: NewStagedEntry) -> ConfdResult<ConfigEntry> {
            unimplemented!()
        }
        async fn update_staged(&self, _: i64, _: i64, _: UpdateStagedEntry) -> ConfdResult<()> {
            unimplemented!()
        }
        async fn delete_staged(&self, _: i64, _: i64, _: &str) -> ConfdResult<()> {
            unimplemented!()
        }
        async fn current_snapshot(&self, app_id: i64) -> ConfdResult<Option<ReleaseSnapshot>> {
            let mut guard = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_none() {
                *guard = Some(ReleaseSnapshot { app_id, config: Vec::new(), release_time: Utc::now(), release_index: 1 });
            }
            Ok(guard.clone())
        }
        async fn snapshots_by_app(&self, _: &[i64]) -> ConfdResult<Vec<ReleaseSnapshot>> {
            unimplemented!()
        }
        async fn release_log(&self, _: i64) -> ConfdResult<Vec<ReleaseLogEntry>> {
            unimplemented!()
        }
        async fn release(&self, _app_id: i64, _operator: &str) -> ConfdResult<ReleaseOutcome> {
            Ok(self.outcome.clone())
        }
    }

    #[tokio::test]
    async fn release_pushes_app_and_key_topics() {
        let store = Arc::new(FakeStore {
            snapshot: Mutex::new(None),
            outcome: ReleaseOutcome { affected_keys: vec!["db.host".into(), "db.port".into()] },
        });
        let broker = Arc::new(NotificationBroker::new());

        let app_waiter = broker.park(app_topic(42));
        let key_waiter = broker.park(key_topic(42, "db.host"));
        let other_key_waiter = broker.park(key_topic(42, "db.port"));

        let coordinator = ReleaseCoordinator::new(store, broker.clone());
        let snapshot = coordinator.release(42, "alice").await.expect("release succeeds");
        assert_eq!(snapshot.release_index, 1);

        let mut app_waiter = app_waiter;
        let mut key_waiter = key_waiter;
        let mut other_key_waiter = other_key_waiter;
        assert!(app_waiter.recv().await.is_some());
        assert!(key_waiter.recv().await.is_some());
        assert!(other_key_waiter.recv().await.is_some());
        assert!(!broker.has(&app_topic(42)));
    }
}
