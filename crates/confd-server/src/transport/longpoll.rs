// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client long-poll endpoint: `GET /api/config` and
//! `GET /api/config/{key}`.
//!
//! Exactly one suspension point per request: a `tokio::select!` race
//! between waiter delivery and a deadline timer.
//! Client disconnect is handled implicitly — axum/hyper drops this
//! handler's future when the connection drops, and `ParkedWait`'s
//! `Drop` impl cancels the parked waiter unconditionally, so every exit
//! path (delivery, timeout, disconnect, even a panic) releases it.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use confd_core::broker::{app_topic, key_topic, NotificationBroker, Waiter};
use confd_core::model::{Application, ReleaseSnapshot, ReleasedEntry};
use serde::{Deserialize, Serialize};

use crate::error::{confd_error_response, ApiError};
use crate::state::ConfdState;

#[derive(Debug, Deserialize)]
pub struct LongPollQuery {
    #[serde(default, rename = "lastIndex")]
    pub last_index: i64,
    #[serde(default, rename = "longPull")]
    pub long_pull: bool,
}

#[derive(Debug, Serialize)]
pub struct AppWatchResponse {
    #[serde(rename = "recentIndex")]
    pub recent_index: i64,
    pub data: BTreeMap<String, ReleasedEntry>,
}

#[derive(Debug, Serialize)]
pub struct KeyWatchResponse {
    #[serde(rename = "recentIndex")]
    pub recent_index: i64,
    pub data: ReleasedEntry,
}

/// Wraps a parked `Waiter` and cancels it on drop, regardless of which
/// branch of the caller's `tokio::select!` resolves first — delivery,
/// timeout, or the handler future itself being dropped on client
/// disconnect.
struct ParkedWait<'a> {
    broker: &'a NotificationBroker,
    waiter: Waiter,
}

impl ParkedWait<'_> {
    async fn recv(&mut self) -> Option<serde_json::Value> {
        self.waiter.recv().await
    }
}

impl Drop for ParkedWait<'_> {
    fn drop(&mut self) {
        self.broker.cancel(&self.waiter);
    }
}

/// `GET /api/config`
pub async fn watch_app(
    State(state): State<Arc<ConfdState>>,
    Extension(app): Extension<Application>,
    Query(query): Query<LongPollQuery>,
) -> axum::response::Response {
    watch(state, app, None, query).await
}

/// `GET /api/config/{key}`
pub async fn watch_key(
    State(state): State<Arc<ConfdState>>,
    Extension(app): Extension<Application>,
    Path(key): Path<String>,
    Query(query): Query<LongPollQuery>,
) -> axum::response::Response {
    watch(state, app, Some(key), query).await
}

async fn watch(
    state: Arc<ConfdState>,
    app: Application,
    key: Option<String>,
    query: LongPollQuery,
) -> axum::response::Response {
    match immediate_response(&state, app.id, key.as_deref(), query.last_index).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(err) => return confd_error_response(&err).into_response(),
    }

    if !query.long_pull {
        return ApiError::NotFound.to_http_response("no change").into_response();
    }

    let topic = match &key {
        Some(k) => key_topic(app.id, k),
        None => app_topic(app.id),
    };
    state.broker.record_last_index(&topic, query.last_index);
    let waiter = state.broker.park(&topic);
    let mut parked = ParkedWait { broker: &state.broker, waiter };

    tokio::select! {
        delivered = parked.recv() => {
            if delivered.is_none() {
                return ApiError::NotFound.to_http_response("release no longer available").into_response();
            }
            match immediate_response(&state, app.id, key.as_deref(), query.last_index).await {
                Ok(Some(response)) => response,
                Ok(None) => ApiError::NotFound.to_http_response("app deleted").into_response(),
                Err(err) => confd_error_response(&err).into_response(),
            }
        }
        _ = tokio::time::sleep(state.config.long_poll_timeout()) => {
            (StatusCode::NOT_MODIFIED, ()).into_response()
        }
    }
}

/// Returns `Ok(Some(response))` when an immediate reply is due (version
/// mismatch), `Ok(None)` when the caller should fall through to parking,
/// and an error when the snapshot is absent (404) or the store failed.
async fn immediate_response(
    state: &ConfdState,
    app_id: i64,
    key: Option<&str>,
    last_index: i64,
) -> confd_core::ConfdResult<Option<axum::response::Response>> {
    let Some(snapshot) = state.store.current_snapshot(app_id).await? else {
        return Ok(Some(ApiError::NotFound.to_http_response("no release for this application").into_response()));
    };

    if snapshot.release_index != last_index {
        return Ok(Some(build_response(&snapshot, key)));
    }

    Ok(None)
}

fn build_response(snapshot: &ReleaseSnapshot, key: Option<&str>) -> axum::response::Response {
    match key {
        None => {
            let data = snapshot.config.iter().map(|e| (e.key.clone(), e.clone())).collect();
            Json(AppWatchResponse { recent_index: snapshot.release_index, data }).into_response()
        }
        Some(key) => match snapshot.find(key) {
            Some(entry) => {
                Json(KeyWatchResponse { recent_index: snapshot.release_index, data: entry.clone() }).into_response()
            }
            None => ApiError::NotFound.to_http_response("key not in current release").into_response(),
        },
    }
}
