// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The node's HTTP control surface.
//!
//! Every endpoint speaks JSON and every handler borrows the same
//! [`AppState`]; requests are served concurrently and serialize only on
//! the memory store's connection.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET  | `/health`            | liveness + uptime |
//! | GET  | `/status`            | tool count, pending approvals, recent events |
//! | GET  | `/approvals`         | pending + recent approval lists |
//! | GET  | `/logs`              | recent episodic events |
//! | GET  | `/api-usage`         | LLM usage summary (`?window_days=N`) |
//! | GET  | `/backup/status`     | backup log summary |
//! | GET  | `/fleet/status`      | per-peer reachability |
//! | GET  | `/interop/messages`  | recent message records |
//! | POST | `/tools/execute`     | policy-gated tool invocation |
//! | POST | `/approvals/:id/resolve` | approve or reject |
//! | POST | `/approvals/:id/execute` | run an approved action |
//! | POST | `/fleet/deploy`      | trigger the deploy script |
//! | POST | `/interop/inbox`     | inbound envelope |
//!
//! When the profile enables public read-only mode, non-GET requests and
//! GETs outside the profile's allowlist answer 403.

mod handlers;
mod readonly;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use haven_config::Profile;
use haven_interop::InteropBridge;
use haven_memory::{ApiUsageLedger, ApprovalQueue, EpisodicLog};
use haven_tools::ToolRegistry;

use crate::backup::BackupStatus;
use crate::fleet::FleetControlPlane;
use crate::llm::LlmClient;

/// Shared state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub profile: Arc<Profile>,
    pub registry: Arc<ToolRegistry>,
    pub approvals: ApprovalQueue,
    pub episodic: EpisodicLog,
    pub api_usage: ApiUsageLedger,
    pub bridge: Arc<InteropBridge>,
    pub backup: Arc<BackupStatus>,
    pub fleet: Arc<FleetControlPlane>,
    pub llm: Option<Arc<LlmClient>>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/approvals", get(handlers::approvals))
        .route("/logs", get(handlers::logs))
        .route("/api-usage", get(handlers::api_usage))
        .route("/backup/status", get(handlers::backup_status))
        .route("/fleet/status", get(handlers::fleet_status))
        .route("/interop/messages", get(handlers::interop_messages))
        .route("/tools/execute", post(handlers::tools_execute))
        .route("/approvals/:id/resolve", post(handlers::resolve_approval))
        .route("/approvals/:id/execute", post(handlers::execute_approval))
        .route("/fleet/deploy", post(handlers::fleet_deploy))
        .route("/interop/inbox", post(handlers::interop_inbox))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            readonly::guard,
        ))
        .with_state(state)
}

/// Serve until the cancellation token fires, then drain gracefully.
pub async fn serve(
    bind: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
