// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth gates: the client API token gate and a minimal bearer-token
//! gate standing in for a full management session/cookie surface.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::{ApiError, ErrorResponse};
use crate::state::ConfdState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn unauthorized() -> Response {
    let body = ErrorResponse { error: ApiError::Unauthorized.to_error_body("unauthorized") };
    (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
}

/// Resolves `?token=` to an `Application` and attaches it to the request
/// extensions as a typed context value, rather than a generic string-keyed
/// context map. Failure is `403`.
pub async fn api_auth_layer(
    state: State<Arc<ConfdState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Ok(Query(TokenQuery { token })) = Query::<TokenQuery>::try_from_uri(req.uri()) else {
        return unauthorized();
    };

    let Some(token) = token else { return unauthorized() };

    let app = match state.store.get_app_by_token(&token).await {
        Ok(Some(app)) => app,
        Ok(None) => return unauthorized(),
        Err(err) => {
            tracing::error!(%err, "auth lookup failed");
            return ApiError::Internal.to_http_response("auth lookup failed").into_response();
        }
    };

    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(app);
    let req = Request::from_parts(parts, body);

    next.run(req).await
}

/// Minimal bearer-token gate for `/manage/*`, standing in for a full
/// session/cookie login flow so the management endpoints have some
/// authenticated caller. No-op if no token is configured.
pub async fn management_auth_layer(
    state: State<Arc<ConfdState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.management_token.as_deref() else {
        return next.run(req).await;
    };

    let header = req.headers().get("authorization").and_then(|v| v.to_str().ok());
    let token = header.and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if constant_time_eq(token, expected) => next.run(req).await,
        _ => unauthorized(),
    }
}
