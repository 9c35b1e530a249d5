// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Node startup — assembles all subsystems and supervises them.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order:
//!
//! 1. Create the profile's data directories.
//! 2. Seed the identity mode into the secrets dir and validate it.
//! 3. Ensure the Ed25519 identity keypair exists.
//! 4. Open the memory store (schema + migrations).
//! 5. Build the policy engine, approval queue and episodic log.
//! 6. Build the interop bridge over the HTTP transport.
//! 7. Register the builtin tools (sandboxed FS tools included).
//! 8. Write the bootstrap facts and the `node_boot` event.
//! 9. Spawn the check-in scheduler.
//! 10. Serve the control surface until SIGINT/SIGTERM.
//!
//! Shutdown cancels one [`CancellationToken`] shared by the HTTP server
//! and the scheduler, then joins the scheduler with a bounded timeout.
//! In-flight tool executions run to completion.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use haven_config::{ensure_profile_directories, Profile, SkillManifest};
use haven_interop::identity::{ensure_identity_keys, load_identity_mode, store_identity_mode};
use haven_interop::{
    CheckinScheduler, CheckinSettings, HttpEnvelopeTransport, IdentityMode, InteropBridge,
};
use haven_memory::{
    ApiUsageLedger, ApprovalQueue, EpisodicLog, InteropLog, MemoryStore, ProfileFacts,
    ProjectStore, VectorStore,
};
use haven_policy::PolicyEngine;
use haven_tools::builtin::{
    DelegateNodeTaskTool, GetTimeTool, IdeaSearchTool, MathTool, RequestEmailTool,
    RuntimeDiagnosticsTool, SandboxListTool, SandboxReadTextTool,
};
use haven_tools::{QueryEmbedder, Sandbox, ToolRegistry};

use crate::backup::BackupStatus;
use crate::fleet::FleetControlPlane;
use crate::http::{serve, AppState};
use crate::llm::{EmbeddingsClient, LlmClient};

const SCHEDULER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a node until SIGINT/SIGTERM.  Errors here are fatal startup
/// failures; once serving, problems surface per-request instead.
pub async fn run(profile: Profile, repo_root: &Path) -> anyhow::Result<()> {
    ensure_profile_directories(&profile)?;
    let secrets_dir = profile.paths.secrets_dir.clone();

    // Seed the identity mode from the profile. An unknown mode string
    // aborts startup.
    let mode = match &profile.interop_identity_mode {
        Some(raw) => IdentityMode::parse(raw)?,
        None => load_identity_mode(&secrets_dir)?,
    };
    store_identity_mode(&secrets_dir, mode)?;
    let identity = ensure_identity_keys(&secrets_dir)?;
    info!(
        profile = %profile.name,
        identity_mode = mode.as_str(),
        public_key = %identity.public_key_b64(),
        "node identity ready"
    );

    let store = MemoryStore::open(&profile.paths.db_path)
        .with_context(|| format!("opening {}", profile.paths.db_path.display()))?;

    let facts = ProfileFacts::new(store.conn());
    let projects = ProjectStore::new(store.conn());
    let episodic = EpisodicLog::new(store.conn());
    let approvals = ApprovalQueue::new(store.conn());
    let api_usage = ApiUsageLedger::new(store.conn());
    let vector = VectorStore::new(store.conn());

    let policy = PolicyEngine::for_profile(&profile.allowed_tool_tiers)
        .context("profile allowed_tool_tiers")?;

    let bridge = Arc::new(InteropBridge::new(
        &profile.name,
        profile.health_port,
        secrets_dir.clone(),
        repo_root.join("config").join("nodes.yaml"),
        InteropLog::new(store.conn()),
        Arc::new(HttpEnvelopeTransport::new()),
    ));

    // ── Tools ─────────────────────────────────────────────────────────────────
    let sandbox = Arc::new(Sandbox::new(
        &profile.paths.sandbox_dir,
        &profile.paths.base_data_dir,
    )?);
    let embedder: Option<Arc<dyn QueryEmbedder>> = EmbeddingsClient::from_secrets(&secrets_dir)
        .map(|c| Arc::new(c) as Arc<dyn QueryEmbedder>);

    let mut registry = ToolRegistry::new(policy, approvals.clone(), episodic.clone(), &profile.name);
    registry.register(MathTool);
    registry.register(GetTimeTool);
    registry.register(RuntimeDiagnosticsTool::new(&profile.name));
    registry.register(SandboxListTool::new(sandbox.clone()));
    registry.register(SandboxReadTextTool::new(sandbox.clone()));
    registry.register(RequestEmailTool);
    registry.register(IdeaSearchTool::new(vector, embedder));
    registry.register(DelegateNodeTaskTool::new(bridge.clone()));
    let registry = Arc::new(registry);

    // ── Bootstrap state ───────────────────────────────────────────────────────
    facts.set("runtime_profile", &profile.name)?;
    facts.set("policy_tier", &profile.policy_tier)?;
    if projects.latest(1, None)?.is_empty() {
        projects.create(
            "Node initialization",
            "Initial runtime bootstrap marker.",
            "completed",
        )?;
    }
    episodic.record(
        "node_boot",
        &json!({ "profile": profile.name, "health_port": profile.health_port }),
        None,
        Some("allow"),
    )?;

    // ── Background tasks ──────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let skills = SkillManifest::open(&profile.paths.skills_dir.join("manifest.yaml"))?;
    let scheduler = CheckinScheduler::new(
        bridge.clone(),
        episodic.clone(),
        skills,
        CheckinSettings::default(),
        cancel.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    tokio::spawn(shutdown_signal(cancel.clone()));

    // ── Control surface (blocks until shutdown) ───────────────────────────────
    let state = AppState {
        llm: LlmClient::from_secrets(&secrets_dir, &profile.llm_default_model).map(Arc::new),
        profile: Arc::new(profile.clone()),
        registry,
        approvals,
        episodic: episodic.clone(),
        api_usage,
        bridge,
        backup: Arc::new(BackupStatus::new(&profile.paths.logs_dir)),
        fleet: Arc::new(FleetControlPlane::new(repo_root, profile.health_port)),
        started_at: Instant::now(),
    };
    let bind: SocketAddr = ([0, 0, 0, 0], profile.health_port).into();
    serve(bind, state, cancel.clone()).await?;

    // ── Drain ─────────────────────────────────────────────────────────────────
    cancel.cancel();
    if tokio::time::timeout(SCHEDULER_JOIN_TIMEOUT, scheduler_task)
        .await
        .is_err()
    {
        warn!("check-in scheduler did not stop within the grace period");
    }
    episodic.record(
        "node_shutdown",
        &json!({ "profile": profile.name }),
        None,
        Some("allow"),
    )?;
    info!(profile = %profile.name, "node stopped");
    Ok(())
}

/// Cancel the supervisor token on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
    cancel.cancel();
}
