// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Public read-only gate.
//!
//! Some nodes expose their control surface to the open internet for
//! dashboards.  With `public_readonly_mode` set, every mutating request
//! is refused and GETs are limited to the profile's endpoint allowlist.

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::AppState;

pub async fn guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.profile.public_readonly_mode {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    if req.method() != Method::GET {
        warn!(%path, method = %req.method(), "rejected non-GET in read-only mode");
        return forbidden("node is in public read-only mode");
    }
    let allowed = state
        .profile
        .public_readonly_get_endpoints
        .iter()
        .any(|endpoint| endpoint == &path);
    if !allowed {
        warn!(%path, "rejected GET outside read-only allowlist");
        return forbidden("endpoint not available in public read-only mode");
    }
    next.run(req).await
}

fn forbidden(message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}
