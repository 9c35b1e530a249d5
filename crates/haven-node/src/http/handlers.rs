// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Request handlers for the control surface.
//!
//! Handlers never panic on storage trouble — database errors become 500s
//! with a JSON error body, security rejections become 400s, and every
//! interop decision lands in the episodic log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use haven_interop::{Envelope, InteropError};

use super::AppState;
use crate::llm::ChatMessage;

fn internal(err: impl std::fmt::Display) -> Response {
    warn!(error = %err, "control surface internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

// ── Read endpoints ────────────────────────────────────────────────────────────

pub(super) async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "profile": state.profile.name,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

pub(super) async fn status(State(state): State<AppState>) -> Response {
    let pending = match state.approvals.list_pending(1000) {
        Ok(p) => p.len(),
        Err(e) => return internal(e),
    };
    let recent_events = match state.episodic.latest(10) {
        Ok(events) => events.len(),
        Err(e) => return internal(e),
    };
    Json(json!({
        "profile": state.profile.name,
        "tools_registered": state.registry.count(),
        "tools": state.registry.list_tools(),
        "pending_approvals": pending,
        "recent_events": recent_events,
    }))
    .into_response()
}

pub(super) async fn approvals(State(state): State<AppState>) -> Response {
    let pending = match state.approvals.list_pending(100) {
        Ok(p) => p,
        Err(e) => return internal(e),
    };
    let recent = match state.approvals.list_recent(100) {
        Ok(r) => r,
        Err(e) => return internal(e),
    };
    Json(json!({ "pending": pending, "recent": recent })).into_response()
}

pub(super) async fn logs(State(state): State<AppState>) -> Response {
    match state.episodic.latest(200) {
        Ok(events) => Json(json!({ "events": events })).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Deserialize)]
pub(super) struct UsageParams {
    window_days: Option<u32>,
}

pub(super) async fn api_usage(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Response {
    match state.api_usage.summary(params.window_days) {
        Ok(summary) => {
            let mut body = serde_json::to_value(&summary).unwrap_or_else(|_| json!({}));
            if let Some(map) = body.as_object_mut() {
                map.insert("profile".to_string(), json!(state.profile.name));
            }
            Json(body).into_response()
        }
        Err(e) => internal(e),
    }
}

pub(super) async fn backup_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.backup.summary())
}

pub(super) async fn fleet_status(State(state): State<AppState>) -> Response {
    match state.fleet.health_report().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal(e),
    }
}

pub(super) async fn interop_messages(State(state): State<AppState>) -> Response {
    match state.bridge.recent_messages(200) {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => internal(e),
    }
}

// ── Tool + approval endpoints ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ToolExecuteBody {
    tool_name: Option<String>,
    payload: Option<Value>,
}

pub(super) async fn tools_execute(
    State(state): State<AppState>,
    Json(body): Json<ToolExecuteBody>,
) -> Response {
    let tool_name = body.tool_name.as_deref().map(str::trim).unwrap_or("");
    if tool_name.is_empty() {
        return bad_request("missing tool_name");
    }
    let payload = body.payload.unwrap_or_else(|| json!({}));
    let result = state.registry.execute(tool_name, payload).await;
    let status = if result.ok { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    (status, Json(json!({ "ok": result.ok, "output": result.output }))).into_response()
}

#[derive(Deserialize)]
pub(super) struct ResolveBody {
    #[serde(default)]
    approve: bool,
}

pub(super) async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ResolveBody>,
) -> Response {
    match state.approvals.resolve(id, body.approve) {
        Ok(true) => {
            if let Err(e) = state.episodic.record(
                "approval_resolved",
                &json!({ "approval_id": id, "approve": body.approve }),
                None,
                Some("allow"),
            ) {
                warn!(error = %e, "episodic record failed");
            }
            Json(json!({ "resolved": true, "approve": body.approve })).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "approval not found or already resolved" })),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

pub(super) async fn execute_approval(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    let result = state.registry.execute_approved(id).await;
    if let Err(e) = state.episodic.record(
        "approval_execution_attempted",
        &json!({ "approval_id": id, "ok": result.ok, "output": result.output }),
        None,
        Some(if result.ok { "allow" } else { "deny" }),
    ) {
        warn!(error = %e, "episodic record failed");
    }
    let status = if result.ok { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    (status, Json(json!({ "ok": result.ok, "output": result.output }))).into_response()
}

// ── Fleet endpoints ───────────────────────────────────────────────────────────

pub(super) async fn fleet_deploy(State(state): State<AppState>) -> Response {
    let result = state.fleet.deploy_all().await;
    let ok = result["ok"].as_bool().unwrap_or(false);
    if let Err(e) = state.episodic.record(
        "fleet_deploy_triggered",
        &json!({ "ok": ok, "returncode": result["returncode"] }),
        None,
        Some(if ok { "allow" } else { "deny" }),
    ) {
        warn!(error = %e, "episodic record failed");
    }
    let status = if ok { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(result)).into_response()
}

// ── Interop inbox ─────────────────────────────────────────────────────────────

fn interop_error_response(err: &InteropError) -> Response {
    let status = match err {
        InteropError::Security(_) => StatusCode::BAD_REQUEST,
        InteropError::Transport(_) | InteropError::PeerRejected { .. } => StatusCode::BAD_GATEWAY,
        InteropError::Config(_) | InteropError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

pub(super) async fn interop_inbox(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let Some(raw_envelope) = body.get("envelope").filter(|e| e.is_object()) else {
        return bad_request("missing envelope object");
    };
    let envelope: Envelope = match serde_json::from_value(raw_envelope.clone()) {
        Ok(env) => env,
        Err(e) => {
            record_rejection(&state, &format!("malformed envelope: {e}"));
            return bad_request(format!("malformed envelope: {e}"));
        }
    };

    let accepted = match state.bridge.receive_envelope(&envelope) {
        Ok(accepted) => accepted,
        Err(err) => {
            record_rejection(&state, &err.to_string());
            return interop_error_response(&err);
        }
    };

    if let Err(e) = state.episodic.record(
        "interop_message_received",
        &json!({
            "source": accepted.source,
            "task_type": accepted.task_type,
            "nonce": accepted.nonce,
        }),
        None,
        Some("allow"),
    ) {
        warn!(error = %e, "episodic record failed");
    }

    let mut response = serde_json::to_value(&accepted).unwrap_or_else(|_| json!({}));

    // A check-in gets an auto-generated reply; a missing LLM key degrades
    // the reply, never the acceptance.
    if accepted.task_type == "skills_checkin" {
        let reply = checkin_reply(&state, &accepted.payload).await;
        if let Some(map) = response.as_object_mut() {
            map.insert("reply".to_string(), reply);
        }
    }

    // Hub duty: unwrap and forward routed envelopes.
    if accepted.task_type == "route_envelope" {
        match relay_inner(&state, &accepted.source, &accepted.payload).await {
            Ok(outcome) => {
                if let Some(map) = response.as_object_mut() {
                    map.insert(
                        "relay".to_string(),
                        serde_json::to_value(&outcome).unwrap_or_else(|_| json!({})),
                    );
                }
            }
            Err(err) => {
                record_rejection(&state, &format!("relay failed: {err}"));
                return interop_error_response(&err);
            }
        }
    }

    Json(response).into_response()
}

fn record_rejection(state: &AppState, error: &str) {
    if let Err(e) = state.episodic.record(
        "interop_message_rejected",
        &json!({ "error": error }),
        None,
        Some("deny"),
    ) {
        warn!(error = %e, "episodic record failed");
    }
}

async fn relay_inner(
    state: &AppState,
    relayer_source: &str,
    payload: &Value,
) -> Result<haven_interop::RelayOutcome, InteropError> {
    let inner: Envelope = serde_json::from_value(payload["envelope"].clone()).map_err(|e| {
        InteropError::Security(format!("route_envelope payload missing inner envelope: {e}"))
    })?;
    let outcome = state
        .bridge
        .forward_relay_envelope(relayer_source, &inner)
        .await?;
    if let Err(e) = state.episodic.record(
        "interop_envelope_relayed",
        &json!({
            "source": inner.source,
            "target": inner.target,
            "task_type": inner.task_type,
        }),
        None,
        Some("allow"),
    ) {
        warn!(error = %e, "episodic record failed");
    }
    Ok(outcome)
}

async fn checkin_reply(state: &AppState, payload: &Value) -> Value {
    let Some(llm) = &state.llm else {
        return json!({ "ok": false, "error": "LLM key missing" });
    };
    let question = payload
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or("Do you have any new skills?");
    let tools = state.registry.list_tools().join(", ");
    let messages = [
        ChatMessage::system(format!(
            "You are {}, a haven agent node. A peer node is asking about your \
             current skills. Answer in one or two short sentences.",
            state.profile.display_name
        )),
        ChatMessage::user(format!("{question}\n\nYour installed tools: {tools}")),
    ];
    match llm.complete(&messages, 256).await {
        Ok((message, usage)) => {
            if let Err(e) = state.api_usage.record(
                &state.profile.name,
                "skills_checkin_reply",
                llm.model(),
                usage.prompt_tokens,
                usage.completion_tokens,
            ) {
                warn!(error = %e, "usage record failed");
            }
            json!({ "ok": true, "message": message })
        }
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}
