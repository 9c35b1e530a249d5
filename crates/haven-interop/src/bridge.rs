// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The interop bridge — build, send, receive and relay signed envelopes.
//!
//! # Routing
//!
//! ```text
//! send(target, ..., Route::Auto)
//!     │ direct POST to target's inbox
//!     ├── ok ──────────────────────────► outbox "sent"
//!     ├── transport error, hub known:
//!     │       wrap in route_envelope, POST to hub
//!     │       ├── ok ──────────────────► outbox "sent:routed:<hub>"
//!     │       └── err ─────────────────► outbox "failed:…", original error
//!     └── any other error ─────────────► outbox "failed:…"
//! ```
//!
//! The hub unwraps `route_envelope` payloads and calls
//! [`InteropBridge::forward_relay_envelope`], which re-validates the inner
//! envelope *without* burning its nonce (the final target does that) and
//! refuses to forward envelopes whose `source` differs from the peer that
//! asked for the relay.
//!
//! Every send appends exactly one outbox row; the receive path writes the
//! nonce and the inbox row in one transaction, so a replay leaves nothing
//! behind.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use haven_config::{NodeDirectory, PeerTarget};
use haven_memory::{Direction, InteropLog, MemoryError, MessageRecord};

use crate::envelope::{
    now_epoch, sign_hmac, sign_identity, verify_hmac, verify_identity, Envelope, IdentityMode,
    SIGNATURE_V2_ALG,
};
use crate::identity::{load_identity_keys, load_identity_mode, load_shared_key};
use crate::transport::EnvelopeTransport;
use crate::InteropError;

/// Longest `reply.message` kept verbatim in outbox payload logs.
const MAX_LOGGED_REPLY_CHARS: usize = 600;

/// Delivery strategy for [`InteropBridge::send_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// POST straight to the target.
    Direct,
    /// Always wrap and deliver via the routing hub.
    Hub,
    /// Direct first, hub on transport failure (unless the target *is*
    /// the hub).
    #[default]
    Auto,
}

/// Successful send result.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub sent: bool,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_via: Option<String>,
    pub response: Value,
}

/// Successful inbound validation result.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedEnvelope {
    pub accepted: bool,
    pub source: String,
    pub target: String,
    pub task_type: String,
    pub payload: Value,
    pub nonce: String,
    pub identity_signature_valid: bool,
}

/// Successful relay result.
#[derive(Debug, Clone, Serialize)]
pub struct RelayOutcome {
    pub forwarded: bool,
    pub target: String,
    pub response: Value,
}

pub struct InteropBridge {
    profile_name: String,
    health_port: u16,
    secrets_dir: PathBuf,
    nodes_path: PathBuf,
    log: InteropLog,
    transport: Arc<dyn EnvelopeTransport>,
}

impl InteropBridge {
    pub fn new(
        profile_name: &str,
        health_port: u16,
        secrets_dir: PathBuf,
        nodes_path: PathBuf,
        log: InteropLog,
        transport: Arc<dyn EnvelopeTransport>,
    ) -> Self {
        Self {
            profile_name: profile_name.to_string(),
            health_port,
            secrets_dir,
            nodes_path,
            log,
            transport,
        }
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Reload the node directory from disk (edits apply without restart).
    pub fn directory(&self) -> Result<NodeDirectory, InteropError> {
        Ok(NodeDirectory::load(&self.nodes_path)?)
    }

    /// Configured peer profiles, excluding ourselves.
    pub fn configured_peers(&self) -> Result<Vec<String>, InteropError> {
        Ok(self
            .directory()?
            .configured_peers(&self.profile_name)
            .into_keys()
            .collect())
    }

    pub fn message_log(&self) -> &InteropLog {
        &self.log
    }

    pub fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRecord>, InteropError> {
        Ok(self.log.recent(limit)?)
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Build and sign an envelope from this node.  The identity signature
    /// is attached when the node has identity keys.
    pub fn build_envelope(
        &self,
        target: &str,
        task_type: &str,
        payload: Value,
    ) -> Result<Envelope, InteropError> {
        let shared_key = load_shared_key(&self.secrets_dir)?;
        let mut envelope = Envelope::unsigned(&self.profile_name, target, task_type, payload);
        envelope.signature = sign_hmac(&shared_key, &envelope);
        if let Some(keys) = load_identity_keys(&self.secrets_dir)? {
            envelope.signer = Some(self.profile_name.clone());
            envelope.signature_v2 = Some(sign_identity(keys.signing_key(), &envelope));
            envelope.signature_v2_alg = Some(SIGNATURE_V2_ALG.to_string());
        }
        Ok(envelope)
    }

    /// Send a task envelope to a configured peer.
    pub async fn send_task(
        &self,
        target_profile: &str,
        task_type: &str,
        payload: Value,
        route: Route,
    ) -> Result<SendOutcome, InteropError> {
        let directory = self.directory()?;
        let peer = directory.peer(target_profile).ok_or_else(|| {
            InteropError::Config(format!("target not allowlisted/configured: {target_profile}"))
        })?;
        let envelope = self.build_envelope(target_profile, task_type, payload.clone())?;

        match route {
            Route::Direct => match self.post_to(&peer, &envelope).await {
                Ok(response) => self.finish_send(&envelope, &payload, response, None),
                Err(err) => self.fail_send(&envelope, &payload, err),
            },
            Route::Hub => {
                let hub = self.hub_peer(&directory, target_profile)?;
                match self.post_via_hub(&hub, &envelope).await {
                    Ok(response) => {
                        self.finish_send(&envelope, &payload, response, Some(hub.profile))
                    }
                    Err(err) => self.fail_send(&envelope, &payload, err),
                }
            }
            Route::Auto => match self.post_to(&peer, &envelope).await {
                Ok(response) => self.finish_send(&envelope, &payload, response, None),
                Err(err @ InteropError::Transport(_)) => {
                    let hub = directory
                        .hub_profile()
                        .filter(|hub| *hub != target_profile)
                        .and_then(|hub| directory.peer(hub));
                    match hub {
                        Some(hub) => match self.post_via_hub(&hub, &envelope).await {
                            Ok(response) => {
                                info!(
                                    peer = target_profile,
                                    hub = %hub.profile,
                                    "direct delivery failed, routed via hub"
                                );
                                self.finish_send(&envelope, &payload, response, Some(hub.profile))
                            }
                            // The hub did not help; surface the original
                            // transport error.
                            Err(_) => self.fail_send(&envelope, &payload, err),
                        },
                        None => self.fail_send(&envelope, &payload, err),
                    }
                }
                Err(err) => self.fail_send(&envelope, &payload, err),
            },
        }
    }

    fn hub_peer(
        &self,
        directory: &NodeDirectory,
        target_profile: &str,
    ) -> Result<PeerTarget, InteropError> {
        let hub = directory
            .hub_profile()
            .ok_or_else(|| InteropError::Config("no routing hub configured".to_string()))?;
        if hub == target_profile {
            return Err(InteropError::Config(format!(
                "cannot hub-route to the hub itself: {hub}"
            )));
        }
        directory
            .peer(hub)
            .ok_or_else(|| InteropError::Config(format!("routing hub not configured: {hub}")))
    }

    async fn post_to(
        &self,
        peer: &PeerTarget,
        envelope: &Envelope,
    ) -> Result<Value, InteropError> {
        self.transport
            .post_envelope(&peer.host, self.health_port, envelope)
            .await
    }

    /// Wrap `inner` in a `route_envelope` envelope addressed to the hub.
    async fn post_via_hub(
        &self,
        hub: &PeerTarget,
        inner: &Envelope,
    ) -> Result<Value, InteropError> {
        let wrapped = self.build_envelope(
            &hub.profile,
            "route_envelope",
            json!({ "envelope": inner }),
        )?;
        self.post_to(hub, &wrapped).await
    }

    fn finish_send(
        &self,
        envelope: &Envelope,
        payload: &Value,
        response: Value,
        routed_via: Option<String>,
    ) -> Result<SendOutcome, InteropError> {
        let status = match &routed_via {
            Some(hub) => format!("sent:routed:{hub}"),
            None => "sent".to_string(),
        };
        self.log.append(
            Direction::Outbox,
            &self.profile_name,
            &envelope.target,
            &envelope.task_type,
            &payload_for_log(payload, &response),
            &envelope.nonce,
            &status,
        )?;
        Ok(SendOutcome {
            sent: true,
            target: envelope.target.clone(),
            routed_via,
            response,
        })
    }

    fn fail_send(
        &self,
        envelope: &Envelope,
        payload: &Value,
        err: InteropError,
    ) -> Result<SendOutcome, InteropError> {
        warn!(peer = %envelope.target, error = %err, "interop send failed");
        self.log.append(
            Direction::Outbox,
            &self.profile_name,
            &envelope.target,
            &envelope.task_type,
            payload,
            &envelope.nonce,
            &format!("failed:{err}"),
        )?;
        Err(err)
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Validate an inbound envelope, burn its nonce, and record it.
    pub fn receive_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<AcceptedEnvelope, InteropError> {
        if envelope.target != self.profile_name {
            return Err(InteropError::Security(format!(
                "envelope target mismatch: expected {}",
                self.profile_name
            )));
        }
        if !envelope.within_skew_window() {
            return Err(InteropError::Security(
                "envelope timestamp outside allowed skew window".to_string(),
            ));
        }
        let shared_key = load_shared_key(&self.secrets_dir)?;
        if !verify_hmac(&shared_key, envelope) {
            return Err(InteropError::Security("envelope signature invalid".to_string()));
        }

        let identity_signature_valid = self.check_identity(envelope)?;

        self.log
            .accept_inbound(
                &envelope.nonce,
                &envelope.source,
                &envelope.target,
                &envelope.task_type,
                &envelope.payload,
            )
            .map_err(|e| match e {
                MemoryError::DuplicateNonce => {
                    InteropError::Security("Replay detected: nonce already seen".to_string())
                }
                other => InteropError::Storage(other),
            })?;

        Ok(AcceptedEnvelope {
            accepted: true,
            source: envelope.source.clone(),
            target: envelope.target.clone(),
            task_type: envelope.task_type.clone(),
            payload: envelope.payload.clone(),
            nonce: envelope.nonce.clone(),
            identity_signature_valid,
        })
    }

    /// Enforce the node's identity mode; returns whether a v2 signature
    /// was present and valid.
    fn check_identity(&self, envelope: &Envelope) -> Result<bool, InteropError> {
        let mode = load_identity_mode(&self.secrets_dir)?;
        let valid = match &envelope.signature_v2 {
            Some(signature_hex) => {
                let signer = envelope.signer.as_deref().unwrap_or(&envelope.source);
                match self.directory()?.signing_public_key(signer) {
                    Some(public_key_b64) => {
                        verify_identity(&public_key_b64, envelope, signature_hex)
                    }
                    // No published key for the claimed signer: the
                    // signature cannot be validated.
                    None => false,
                }
            }
            None => false,
        };

        match mode {
            IdentityMode::Compat => Ok(valid),
            IdentityMode::Provenance => {
                if envelope.signature_v2.is_some() && !valid {
                    Err(InteropError::Security(
                        "identity signature invalid (provenance mode)".to_string(),
                    ))
                } else {
                    Ok(valid)
                }
            }
            IdentityMode::Strict => {
                if valid {
                    Ok(true)
                } else {
                    Err(InteropError::Security(
                        "valid identity signature required (strict mode)".to_string(),
                    ))
                }
            }
        }
    }

    // ── Relay ─────────────────────────────────────────────────────────────────

    /// Forward an envelope on behalf of a peer (hub duty).
    ///
    /// The relayer must be the inner envelope's source — a relayer cannot
    /// forward envelopes claiming to come from somebody else.  The inner
    /// envelope is re-validated here, but its nonce is *not* burned: only
    /// the final target does that.
    pub async fn forward_relay_envelope(
        &self,
        relayer_source: &str,
        inner: &Envelope,
    ) -> Result<RelayOutcome, InteropError> {
        if relayer_source != inner.source {
            return Err(InteropError::Security(format!(
                "relay source mismatch: relayer {relayer_source} != envelope source {}",
                inner.source
            )));
        }
        if !inner.within_skew_window() {
            return Err(InteropError::Security(
                "inner envelope timestamp outside allowed skew window".to_string(),
            ));
        }
        let shared_key = load_shared_key(&self.secrets_dir)?;
        if !verify_hmac(&shared_key, inner) {
            return Err(InteropError::Security(
                "inner envelope signature invalid".to_string(),
            ));
        }
        self.check_identity_for_relay(inner)?;

        let peer = self.directory()?.peer(&inner.target).ok_or_else(|| {
            InteropError::Config(format!(
                "relay target not allowlisted/configured: {}",
                inner.target
            ))
        })?;
        let response = self.post_to(&peer, inner).await?;

        self.log.append(
            Direction::Relay,
            &inner.source,
            &inner.target,
            &inner.task_type,
            &inner.payload,
            &inner.nonce,
            &format!("forwarded_by:{}", self.profile_name),
        )?;
        info!(
            source = %inner.source,
            to = %inner.target,
            "relayed envelope"
        );

        Ok(RelayOutcome {
            forwarded: true,
            target: inner.target.clone(),
            response,
        })
    }

    /// Identity check for relayed envelopes — same matrix as receive, but
    /// target-agnostic (the inner envelope is addressed to someone else).
    fn check_identity_for_relay(&self, inner: &Envelope) -> Result<(), InteropError> {
        self.check_identity(inner).map(|_| ())
    }
}

/// Copy of the outbound payload for the message log; an embedded
/// check-in reply is kept but its message is clipped so one chatty peer
/// does not bloat the log.
fn payload_for_log(payload: &Value, response: &Value) -> Value {
    let mut out = payload.clone();
    let (Some(out_map), Some(reply)) = (out.as_object_mut(), response.get("reply")) else {
        return out;
    };
    if let Some(reply_map) = reply.as_object() {
        let mut reply_copy = reply_map.clone();
        if let Some(Value::String(message)) = reply_copy.get("message") {
            if message.chars().count() > MAX_LOGGED_REPLY_CHARS {
                let clipped: String = message.chars().take(MAX_LOGGED_REPLY_CHARS - 3).collect();
                reply_copy.insert("message".to_string(), Value::String(format!("{clipped}...")));
            }
        }
        out_map.insert("reply".to_string(), Value::Object(reply_copy));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
