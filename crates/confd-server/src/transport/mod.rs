// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the confd server: the client long-poll API and the
//! operator management API, wired behind their respective auth gates.

pub mod auth;
pub mod longpoll;
pub mod management;

use std::any::Any;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ErrorResponse};
use crate::state::ConfdState;

/// Build the axum `Router` with all client and management routes.
pub fn build_router(state: Arc<ConfdState>) -> Router {
    let client_api = Router::new()
        .route("/api/config", get(longpoll::watch_app))
        .route("/api/config/{key}", get(longpoll::watch_key))
        .layer(middleware::from_fn_with_state(state.clone(), auth::api_auth_layer));

    // `POST /config/{appId}/release` is the one management path spec.md
    // gives literally (no `/manage` prefix) — mounted at the root so
    // callers following the documented contract don't 404. It shares the
    // management auth gate with everything else under `/manage`.
    let release_api = Router::new()
        .route("/config/{appId}/release", post(management::release))
        .layer(middleware::from_fn_with_state(state.clone(), auth::management_auth_layer));

    let management_api = Router::new()
        .route("/manage/apps", post(management::create_app))
        .route("/manage/apps/{appId}", get(management::get_app).delete(management::delete_app))
        .route("/manage/config/{appId}", get(management::list_config).post(management::create_config))
        .route(
            "/manage/config/{appId}/{configId}",
            put(management::update_config).delete(management::delete_config),
        )
        .route("/manage/config/{appId}/log", get(management::release_log))
        .layer(middleware::from_fn_with_state(state.clone(), auth::management_auth_layer));

    Router::new()
        .merge(client_api)
        .merge(release_api)
        .merge(management_api)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Renders a caught handler panic as the same `{"error":{"code","message"}}`
/// envelope every other failure path in this service uses, instead of
/// tower-http's default plain-text body.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };
    tracing::error!(panic = %detail, "handler panicked");
    let body = ErrorResponse { error: ApiError::Internal.to_error_body("internal server error") };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
