// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the confd HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP or Postgres needed. State is
//! backed by an in-memory `ReleaseStore` fake that reproduces just enough
//! of the release transaction to exercise the client long-poll surface
//! and the management surface end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use confd_core::broker::NotificationBroker;
use confd_core::error::{ConfdError, ConfdResult};
use confd_core::model::{
    Application, ConfigEntry, EntryStatus, NewStagedEntry, PendingOp, ReleaseLogEntry,
    ReleaseOutcome, ReleaseSnapshot, ReleasedEntry, UpdateStagedEntry,
};
use confd_core::store::{ListStagedQuery, Page, ReleaseStore};
use confd_server::config::ServerConfig;
use confd_server::state::ConfdState;
use confd_server::transport::build_router;

/// An in-memory double for Postgres, just faithful enough to the release
/// transaction to drive the HTTP layer end to end.
#[derive(Default)]
struct FakeStore {
    next_app_id: AtomicI64,
    next_config_id: AtomicI64,
    apps: Mutex<HashMap<i64, Application>>,
    config: Mutex<HashMap<i64, ConfigEntry>>,
    snapshots: Mutex<HashMap<i64, ReleaseSnapshot>>,
    logs: Mutex<HashMap<i64, Vec<ReleaseLogEntry>>>,
}

#[async_trait]
impl ReleaseStore for FakeStore {
    async fn create_app(&self, code: &str, name: &str, description: &str) -> ConfdResult<Application> {
        let id = self.next_app_id.fetch_add(1, Ordering::Relaxed) + 1;
        let app = Application {
            id,
            code: code.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            api_token: format!("token-{id}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            release_index: 0,
        };
        self.apps.lock().unwrap_or_else(|p| p.into_inner()).insert(id, app.clone());
        Ok(app)
    }

    async fn get_app(&self, app_id: i64) -> ConfdResult<Option<Application>> {
        Ok(self.apps.lock().unwrap_or_else(|p| p.into_inner()).get(&app_id).cloned())
    }

    async fn get_app_by_token(&self, token: &str) -> ConfdResult<Option<Application>> {
        Ok(self
            .apps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .find(|a| a.api_token == token)
            .cloned())
    }

    async fn delete_app(&self, app_id: i64) -> ConfdResult<()> {
        let removed = self.apps.lock().unwrap_or_else(|p| p.into_inner()).remove(&app_id);
        if removed.is_none() {
            return Err(ConfdError::AppNotFound(app_id));
        }
        self.config.lock().unwrap_or_else(|p| p.into_inner()).retain(|_, e| e.app_id != app_id);
        self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).remove(&app_id);
        self.logs.lock().unwrap_or_else(|p| p.into_inner()).remove(&app_id);
        Ok(())
    }

    async fn list_staged(&self, app_id: i64, _query: &ListStagedQuery) -> ConfdResult<Page<ConfigEntry>> {
        let items: Vec<ConfigEntry> = self
            .config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|e| e.app_id == app_id)
            .cloned()
            .collect();
        let total_count = items.len() as i64;
        Ok(Page { items, page_index: 0, page_size: total_count.max(1), total_count })
    }

    async fn get_staged(&self, app_id: i64, config_id: i64) -> ConfdResult<Option<ConfigEntry>> {
        Ok(self
            .config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&config_id)
            .filter(|e| e.app_id == app_id)
            .cloned())
    }

    async fn create_staged(&self, entry: NewStagedEntry) -> ConfdResult<ConfigEntry> {
        let collides = self
            .config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .any(|e| e.app_id == entry.app_id && e.key == entry.key && !matches!(e.pending_op, Some(PendingOp::Delete)));
        if collides {
            return Err(ConfdError::DuplicateKey(entry.key));
        }

        let id = self.next_config_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Utc::now();
        let row = ConfigEntry {
            id,
            app_id: entry.app_id,
            key: entry.key,
            value: entry.value,
            description: entry.description,
            status: EntryStatus::Staged,
            pending_op: Some(PendingOp::New),
            created_at: now,
            created_by: entry.created_by.clone(),
            updated_at: now,
            updated_by: entry.created_by,
            released_at: None,
            released_by: None,
        };
        self.config.lock().unwrap_or_else(|p| p.into_inner()).insert(id, row.clone());
        Ok(row)
    }

    async fn update_staged(&self, app_id: i64, config_id: i64, patch: UpdateStagedEntry) -> ConfdResult<()> {
        let mut guard = self.config.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.get_mut(&config_id).filter(|e| e.app_id == app_id).ok_or(ConfdError::EntryNotFound(config_id))?;
        if let Some(value) = patch.value {
            entry.value = value;
        }
        if let Some(description) = patch.description {
            entry.description = description;
        }
        entry.status = EntryStatus::Staged;
        entry.pending_op = match entry.pending_op {
            Some(PendingOp::New) => Some(PendingOp::New),
            _ => Some(PendingOp::Update),
        };
        entry.updated_by = patch.updated_by;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_staged(&self, app_id: i64, config_id: i64, deleted_by: &str) -> ConfdResult<()> {
        let mut guard = self.config.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.get_mut(&config_id).filter(|e| e.app_id == app_id).ok_or(ConfdError::EntryNotFound(config_id))?;
        entry.status = EntryStatus::Staged;
        entry.pending_op = Some(PendingOp::Delete);
        entry.updated_by = deleted_by.to_owned();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn current_snapshot(&self, app_id: i64) -> ConfdResult<Option<ReleaseSnapshot>> {
        Ok(self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).get(&app_id).cloned())
    }

    async fn snapshots_by_app(&self, app_ids: &[i64]) -> ConfdResult<Vec<ReleaseSnapshot>> {
        let guard = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        Ok(app_ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn release_log(&self, app_id: i64) -> ConfdResult<Vec<ReleaseLogEntry>> {
        Ok(self.logs.lock().unwrap_or_else(|p| p.into_inner()).get(&app_id).cloned().unwrap_or_default())
    }

    async fn release(&self, app_id: i64, operator: &str) -> ConfdResult<ReleaseOutcome> {
        let mut apps = self.apps.lock().unwrap_or_else(|p| p.into_inner());
        let app = apps.get_mut(&app_id).ok_or(ConfdError::AppNotFound(app_id))?;

        let mut config = self.config.lock().unwrap_or_else(|p| p.into_inner());
        let staged_ids: Vec<i64> =
            config.values().filter(|e| e.app_id == app_id && e.status == EntryStatus::Staged).map(|e| e.id).collect();
        if staged_ids.is_empty() {
            return Err(ConfdError::NothingStaged(app_id));
        }

        let now = Utc::now();
        let mut affected_keys = Vec::new();
        for id in staged_ids {
            let entry = config.get_mut(&id).expect("id came from this same map");
            affected_keys.push(entry.key.clone());
            match entry.pending_op {
                Some(PendingOp::Delete) => {
                    config.remove(&id);
                }
                _ => {
                    let e = config.get_mut(&id).expect("not removed above");
                    e.status = EntryStatus::Released;
                    e.pending_op = None;
                    e.released_at = Some(now);
                    e.released_by = Some(operator.to_owned());
                }
            }
        }

        app.release_index += 1;
        let new_index = app.release_index;

        let released: Vec<ReleasedEntry> = config
            .values()
            .filter(|e| e.app_id == app_id && e.status == EntryStatus::Released)
            .map(ReleasedEntry::from_entry)
            .collect();

        let snapshot = ReleaseSnapshot { app_id, config: released.clone(), release_time: now, release_index: new_index };
        self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).insert(app_id, snapshot);

        self.logs.lock().unwrap_or_else(|p| p.into_inner()).entry(app_id).or_default().push(ReleaseLogEntry {
            id: new_index,
            app_id,
            config: released,
            release_time: now,
            release_index: new_index,
            released_by: operator.to_owned(),
        });

        Ok(ReleaseOutcome { affected_keys })
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: String::new(),
        management_token: Some("ops-secret".into()),
        sweep_interval_ms: 60_000,
        long_poll_timeout_ms: 500,
        db_max_connections: 1,
    }
}

fn test_server() -> (TestServer, Arc<FakeStore>) {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(NotificationBroker::new());
    let state = Arc::new(ConfdState::new(store.clone(), broker, test_config(), CancellationToken::new()));
    let router = build_router(state);
    (TestServer::new(router).expect("failed to create test server"), store)
}

async fn seed_app_with_release(store: &FakeStore) -> Application {
    let app = store.create_app("demo", "Demo App", "").await.expect("create_app");
    store
        .create_staged(NewStagedEntry {
            app_id: app.id,
            key: "db.host".into(),
            value: "10.0.0.1".into(),
            description: String::new(),
            created_by: "alice".into(),
        })
        .await
        .expect("create_staged");
    store.release(app.id, "alice").await.expect("release");
    app
}

#[tokio::test]
async fn client_api_rejects_missing_token() -> anyhow::Result<()> {
    let (server, _store) = test_server();

    let resp = server.get("/api/config?lastIndex=0").await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn client_api_rejects_unknown_token() -> anyhow::Result<()> {
    let (server, _store) = test_server();
    let resp = server.get("/api/config?lastIndex=0&token=not-a-real-token").await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn app_watch_returns_current_snapshot_immediately() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let resp = server.get(&format!("/api/config?lastIndex=0&token={}", app.api_token)).await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["recentIndex"], 1);
    assert_eq!(body["data"]["db.host"]["value"], "10.0.0.1");
    Ok(())
}

#[tokio::test]
async fn app_watch_with_current_index_and_no_long_poll_returns_404() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let resp = server.get(&format!("/api/config?lastIndex=1&token={}", app.api_token)).await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn key_watch_returns_404_for_unknown_key() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let resp = server.get(&format!("/api/config/does.not.exist?lastIndex=0&token={}", app.api_token)).await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn key_watch_returns_value_for_known_key() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let resp = server.get(&format!("/api/config/db.host?lastIndex=0&token={}", app.api_token)).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["recentIndex"], 1);
    assert_eq!(body["data"]["value"], "10.0.0.1");
    Ok(())
}

#[tokio::test]
async fn long_poll_times_out_with_304_when_nothing_changes() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let resp = server.get(&format!("/api/config?lastIndex=1&longPull=true&token={}", app.api_token)).await;
    resp.assert_status(axum::http::StatusCode::NOT_MODIFIED);
    Ok(())
}

#[tokio::test]
async fn long_poll_wakes_on_release_and_returns_new_snapshot() -> anyhow::Result<()> {
    let (server, store) = test_server();
    let app = seed_app_with_release(&store).await;

    let long_poll = server.get(&format!("/api/config?lastIndex=1&longPull=true&token={}", app.api_token));

    let store_clone = store.clone();
    let app_id = app.id;
    let release_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        store_clone
            .create_staged(NewStagedEntry {
                app_id,
                key: "db.port".into(),
                value: "5432".into(),
                description: String::new(),
                created_by: "bob".into(),
            })
            .await
            .expect("create_staged");
        store_clone.release(app_id, "bob").await.expect("release")
    });

    let resp = long_poll.await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["recentIndex"], 2);
    assert_eq!(body["data"]["db.port"]["value"], "5432");

    release_task.await?;
    Ok(())
}

#[tokio::test]
async fn management_requires_bearer_token() -> anyhow::Result<()> {
    let (server, _store) = test_server();

    let resp = server.post("/manage/apps").json(&serde_json::json!({"code": "x", "name": "X"})).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn management_create_stage_and_release_flow() -> anyhow::Result<()> {
    let (server, _store) = test_server();

    let create_resp = server
        .post("/manage/apps")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"code": "flow-app", "name": "Flow App"}))
        .await;
    create_resp.assert_status_ok();
    let app: serde_json::Value = create_resp.json();
    let app_id = app["id"].as_i64().expect("app id");

    let stage_resp = server
        .post(&format!("/manage/config/{app_id}"))
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"key": "feature.flag", "value": "on", "created_by": "carol"}))
        .await;
    stage_resp.assert_status_ok();

    let release_resp = server
        .post(&format!("/config/{app_id}/release"))
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"operator": "carol"}))
        .await;
    release_resp.assert_status_ok();
    let snapshot: serde_json::Value = release_resp.json();
    assert_eq!(snapshot["release_index"], 1);

    let log_resp = server.get(&format!("/manage/config/{app_id}/log")).add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret")).await;
    log_resp.assert_status_ok();
    let log: Vec<serde_json::Value> = log_resp.json();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["released_by"], "carol");
    Ok(())
}

#[tokio::test]
async fn create_config_rejects_duplicate_key_with_409() -> anyhow::Result<()> {
    let (server, _store) = test_server();

    let create_resp = server
        .post("/manage/apps")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"code": "dup-app", "name": "Dup App"}))
        .await;
    let app: serde_json::Value = create_resp.json();
    let app_id = app["id"].as_i64().expect("app id");

    let stage_once = server
        .post(&format!("/manage/config/{app_id}"))
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"key": "db.host", "value": "10.0.0.1", "created_by": "carol"}))
        .await;
    stage_once.assert_status_ok();

    let stage_again = server
        .post(&format!("/manage/config/{app_id}"))
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"key": "db.host", "value": "10.0.0.2", "created_by": "carol"}))
        .await;
    stage_again.assert_status(axum::http::StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn release_with_nothing_staged_fails_with_400() -> anyhow::Result<()> {
    let (server, _store) = test_server();

    let create_resp = server
        .post("/manage/apps")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"code": "empty-app", "name": "Empty"}))
        .await;
    let app: serde_json::Value = create_resp.json();
    let app_id = app["id"].as_i64().expect("app id");

    let release_resp = server
        .post(&format!("/config/{app_id}/release"))
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer ops-secret"))
        .json(&serde_json::json!({"operator": "carol"}))
        .await;
    release_resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    Ok(())
}
