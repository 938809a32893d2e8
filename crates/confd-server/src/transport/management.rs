// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Management API handlers: application and staged-config CRUD, release
//! triggering, and release log listing. Gated by `auth::management_auth_layer`
//! rather than a full session-cookie login flow.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use confd_core::model::{NewStagedEntry, UpdateStagedEntry};
use confd_core::store::ListStagedQuery;
use serde::{Deserialize, Serialize};

use crate::error::{confd_error_response, ApiError};
use crate::state::ConfdState;

// -- Request/response types --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub value: Option<String>,
    pub description: Option<String>,
    pub updated_by: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteConfigRequest {
    pub deleted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct ListConfigQuery {
    #[serde(default)]
    pub like_key: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
}

// -- App handlers -------------------------------------------------------------

/// `POST /manage/apps`
pub async fn create_app(
    State(state): State<Arc<ConfdState>>,
    Json(req): Json<CreateAppRequest>,
) -> axum::response::Response {
    if req.code.trim().is_empty() || req.name.trim().is_empty() {
        return ApiError::BadRequest.to_http_response("code and name are required").into_response();
    }
    match state.store.create_app(&req.code, &req.name, &req.description).await {
        Ok(app) => Json(app).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `GET /manage/apps/{appId}`
pub async fn get_app(State(state): State<Arc<ConfdState>>, Path(app_id): Path<i64>) -> axum::response::Response {
    match state.store.get_app(app_id).await {
        Ok(Some(app)) => Json(app).into_response(),
        Ok(None) => ApiError::NotFound.to_http_response("application not found").into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `DELETE /manage/apps/{appId}`
pub async fn delete_app(State(state): State<Arc<ConfdState>>, Path(app_id): Path<i64>) -> axum::response::Response {
    match state.store.delete_app(app_id).await {
        Ok(()) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

// -- Config handlers ------------------------------------------------------------

/// `GET /manage/config/{appId}` — paginated, prefix-matched staged listing.
pub async fn list_config(
    State(state): State<Arc<ConfdState>>,
    Path(app_id): Path<i64>,
    Query(query): Query<ListConfigQuery>,
) -> axum::response::Response {
    let store_query =
        ListStagedQuery { like_key: query.like_key, page_index: query.page, page_size: query.page_size };
    match state.store.list_staged(app_id, &store_query).await {
        Ok(page) => Json(PageResponse {
            items: page.items,
            page: page.page_index,
            page_size: page.page_size,
            total_count: page.total_count,
        })
        .into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `POST /manage/config/{appId}`
pub async fn create_config(
    State(state): State<Arc<ConfdState>>,
    Path(app_id): Path<i64>,
    Json(req): Json<CreateConfigRequest>,
) -> axum::response::Response {
    if req.key.trim().is_empty() {
        return ApiError::BadRequest.to_http_response("key is required").into_response();
    }
    let entry = NewStagedEntry {
        app_id,
        key: req.key,
        value: req.value,
        description: req.description,
        created_by: req.created_by,
    };
    match state.store.create_staged(entry).await {
        Ok(entry) => Json(entry).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `PUT /manage/config/{appId}/{configId}`
pub async fn update_config(
    State(state): State<Arc<ConfdState>>,
    Path((app_id, config_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateConfigRequest>,
) -> axum::response::Response {
    let patch = UpdateStagedEntry { value: req.value, description: req.description, updated_by: req.updated_by };
    match state.store.update_staged(app_id, config_id, patch).await {
        Ok(()) => Json(serde_json::json!({ "updated": true })).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `DELETE /manage/config/{appId}/{configId}` — soft-delete: stages a
/// `DELETE` pending op, removed on the next release.
pub async fn delete_config(
    State(state): State<Arc<ConfdState>>,
    Path((app_id, config_id)): Path<(i64, i64)>,
    Json(req): Json<DeleteConfigRequest>,
) -> axum::response::Response {
    match state.store.delete_staged(app_id, config_id, &req.deleted_by).await {
        Ok(()) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `POST /config/{appId}/release` — promotes staged state and notifies
/// parked waiters. Mounted outside `/manage` to match the literal path,
/// but still gated by the management auth layer.
pub async fn release(
    State(state): State<Arc<ConfdState>>,
    Path(app_id): Path<i64>,
    Json(req): Json<ReleaseRequest>,
) -> axum::response::Response {
    match state.coordinator.release(app_id, &req.operator).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}

/// `GET /manage/config/{appId}/log` — read-only release history.
pub async fn release_log(
    State(state): State<Arc<ConfdState>>,
    Path(app_id): Path<i64>,
) -> axum::response::Response {
    match state.store.release_log(app_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => confd_error_response(&err).into_response(),
    }
}
