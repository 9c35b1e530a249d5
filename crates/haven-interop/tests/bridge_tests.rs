// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! End-to-end bridge behavior against a recording mock transport:
//! routing with hub fallback, inbound validation, replay defense,
//! identity modes and relay source binding.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use haven_config::SkillManifest;
use haven_interop::envelope::{self, Envelope};
use haven_interop::identity::store_identity_mode;
use haven_interop::{
    CheckinScheduler, CheckinSettings, EnvelopeTransport, IdentityMode, InteropBridge,
    InteropError, Route,
};
use haven_memory::{EpisodicLog, InteropLog, MemoryStore};

const SHARED_KEY: &[u8] = b"test-key";

const NODES_YAML: &str = "\
routing:
  hub_profile: jason
nodes:
  jason:
    host: hub.local
    profile: jason
  kiera:
    host: kiera.local
    profile: kiera
";

/// Records every POST; hosts in `fail_hosts` raise a transport error.
struct MockTransport {
    calls: Mutex<Vec<(String, Envelope)>>,
    fail_hosts: HashSet<String>,
}

impl MockTransport {
    fn new(fail_hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_hosts: fail_hosts.iter().map(|h| h.to_string()).collect(),
        })
    }

    fn hosts_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(h, _)| h.clone()).collect()
    }

    fn last_envelope(&self) -> Envelope {
        self.calls.lock().unwrap().last().expect("at least one call").1.clone()
    }
}

#[async_trait]
impl EnvelopeTransport for MockTransport {
    async fn post_envelope(
        &self,
        host: &str,
        _port: u16,
        envelope: &Envelope,
    ) -> Result<Value, InteropError> {
        if self.fail_hosts.contains(host) {
            return Err(InteropError::Transport(format!("no route to {host}")));
        }
        self.calls.lock().unwrap().push((host.to_string(), envelope.clone()));
        Ok(json!({"ok": true}))
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    bridge: Arc<InteropBridge>,
    log: InteropLog,
    transport: Arc<MockTransport>,
    secrets_dir: std::path::PathBuf,
}

fn fixture(profile: &str, fail_hosts: &[&str]) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let secrets_dir = tmp.path().join("secrets");
    std::fs::create_dir_all(&secrets_dir).unwrap();
    std::fs::write(secrets_dir.join("interop_shared_key.txt"), "test-key\n").unwrap();
    let nodes_path = tmp.path().join("nodes.yaml");
    std::fs::write(&nodes_path, NODES_YAML).unwrap();

    let store = MemoryStore::open_in_memory().unwrap();
    let log = InteropLog::new(store.conn());
    let transport = MockTransport::new(fail_hosts);
    let bridge = Arc::new(InteropBridge::new(
        profile,
        8600,
        secrets_dir.clone(),
        nodes_path,
        log.clone(),
        transport.clone(),
    ));
    Fixture { _tmp: tmp, bridge, log, transport, secrets_dir }
}

fn signed_envelope(source: &str, target: &str, task_type: &str, payload: Value) -> Envelope {
    let mut env = Envelope::unsigned(source, target, task_type, payload);
    env.signature = envelope::sign_hmac(SHARED_KEY, &env);
    env
}

// ── Send routing ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_send_records_sent_outbox_row() {
    let fx = fixture("scarlet", &[]);
    let outcome = fx
        .bridge
        .send_task("kiera", "skills_checkin", json!({"question": "hi"}), Route::Direct)
        .await
        .unwrap();
    assert!(outcome.sent);
    assert!(outcome.routed_via.is_none());
    assert_eq!(fx.transport.hosts_called(), vec!["kiera.local"]);

    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, "outbox");
    assert_eq!(messages[0].status, "sent");
}

#[tokio::test]
async fn auto_send_falls_back_via_hub() {
    // S1: direct POST to kiera fails, bridge retries via jason.
    let fx = fixture("scarlet", &["kiera.local"]);
    let outcome = fx
        .bridge
        .send_task("kiera", "skills_checkin", json!({"question": "hi"}), Route::Auto)
        .await
        .unwrap();
    assert!(outcome.sent);
    assert_eq!(outcome.routed_via.as_deref(), Some("jason"));

    // The hub received a route_envelope wrapping the original.
    assert_eq!(fx.transport.hosts_called(), vec!["hub.local"]);
    let wrapped = fx.transport.last_envelope();
    assert_eq!(wrapped.task_type, "route_envelope");
    assert_eq!(wrapped.target, "jason");
    let inner: Envelope =
        serde_json::from_value(wrapped.payload["envelope"].clone()).unwrap();
    assert_eq!(inner.target, "kiera");
    assert_eq!(inner.task_type, "skills_checkin");

    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, "sent:routed:jason");
}

#[tokio::test]
async fn auto_send_to_hub_itself_does_not_loop() {
    let fx = fixture("scarlet", &["hub.local"]);
    let err = fx
        .bridge
        .send_task("jason", "skills_checkin", json!({}), Route::Auto)
        .await
        .unwrap_err();
    assert!(matches!(err, InteropError::Transport(_)));
    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].status.starts_with("failed:"));
}

#[tokio::test]
async fn auto_send_surfaces_original_error_when_hub_also_fails() {
    let fx = fixture("scarlet", &["kiera.local", "hub.local"]);
    let err = fx
        .bridge
        .send_task("kiera", "skills_checkin", json!({}), Route::Auto)
        .await
        .unwrap_err();
    match err {
        InteropError::Transport(msg) => assert!(msg.contains("kiera.local")),
        other => panic!("expected transport error, got {other:?}"),
    }
    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1, "exactly one outbox row per send");
    assert!(messages[0].status.starts_with("failed:"));
}

#[tokio::test]
async fn send_to_unconfigured_target_fails_without_outbox_row() {
    let fx = fixture("scarlet", &[]);
    let err = fx
        .bridge
        .send_task("ghost", "ping", json!({}), Route::Direct)
        .await
        .unwrap_err();
    assert!(matches!(err, InteropError::Config(_)));
    assert!(fx.log.recent(10).unwrap().is_empty());
}

#[tokio::test]
async fn outbound_envelopes_carry_valid_hmac() {
    let fx = fixture("scarlet", &[]);
    fx.bridge
        .send_task("kiera", "ping", json!({"n": 1}), Route::Direct)
        .await
        .unwrap();
    let sent = fx.transport.last_envelope();
    assert!(envelope::verify_hmac(SHARED_KEY, &sent));
    assert_eq!(sent.source, "scarlet");
}

// ── Inbound validation ────────────────────────────────────────────────────────

#[test]
fn valid_inbound_envelope_is_accepted() {
    // S2: fresh nonce, valid HMAC, correct target.
    let fx = fixture("scarlet", &[]);
    let env = signed_envelope("jason", "scarlet", "skills_checkin", json!({"question": "hi"}));
    let accepted = fx.bridge.receive_envelope(&env).unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.source, "jason");
    assert_eq!(accepted.nonce, env.nonce);
    assert!(!accepted.identity_signature_valid);

    assert!(fx.log.nonce_seen(&env.nonce).unwrap());
    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, "inbox");
    assert_eq!(messages[0].status, "received");
}

#[test]
fn replayed_envelope_is_rejected_without_new_rows() {
    // S3: the second receive with the same nonce fails.
    let fx = fixture("scarlet", &[]);
    let env = signed_envelope("jason", "scarlet", "skills_checkin", json!({}));
    fx.bridge.receive_envelope(&env).unwrap();
    let err = fx.bridge.receive_envelope(&env).unwrap_err();
    assert!(err.to_string().contains("Replay detected"));
    assert_eq!(fx.log.recent(10).unwrap().len(), 1);
}

#[test]
fn wrong_target_is_rejected() {
    let fx = fixture("scarlet", &[]);
    let env = signed_envelope("jason", "kiera", "ping", json!({}));
    let err = fx.bridge.receive_envelope(&env).unwrap_err();
    assert!(err.to_string().contains("target mismatch"));
    assert!(fx.log.recent(10).unwrap().is_empty());
}

#[test]
fn stale_timestamp_is_rejected() {
    let fx = fixture("scarlet", &[]);
    let mut env = Envelope::unsigned("jason", "scarlet", "ping", json!({}));
    env.timestamp -= envelope::MAX_CLOCK_SKEW_SECONDS + 10;
    env.signature = envelope::sign_hmac(SHARED_KEY, &env);
    let err = fx.bridge.receive_envelope(&env).unwrap_err();
    assert!(err.to_string().contains("skew"));
}

#[test]
fn bad_signature_is_rejected() {
    let fx = fixture("scarlet", &[]);
    let mut env = signed_envelope("jason", "scarlet", "ping", json!({"x": 1}));
    env.payload = json!({"x": 2});
    let err = fx.bridge.receive_envelope(&env).unwrap_err();
    assert!(err.to_string().contains("signature invalid"));
    assert!(fx.log.recent(10).unwrap().is_empty());
}

// ── Identity modes ────────────────────────────────────────────────────────────

fn identity_fixture(mode: IdentityMode) -> (Fixture, ed25519_dalek::SigningKey) {
    use base64::Engine;
    use rand::RngCore;

    let fx = fixture("scarlet", &[]);
    store_identity_mode(&fx.secrets_dir, mode).unwrap();

    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let public_b64 =
        base64::engine::general_purpose::STANDARD.encode(key.verifying_key().to_bytes());

    // Publish jason's key in the directory the bridge reloads per call.
    let nodes = format!(
        "routing:\n  hub_profile: jason\nnodes:\n  jason:\n    host: hub.local\n    profile: jason\n    signing_public_key: \"{public_b64}\"\n  kiera:\n    host: kiera.local\n    profile: kiera\n"
    );
    std::fs::write(fx._tmp.path().join("nodes.yaml"), nodes).unwrap();
    (fx, key)
}

fn identity_signed(key: &ed25519_dalek::SigningKey, target: &str) -> Envelope {
    let mut env = signed_envelope("jason", target, "ping", json!({}));
    env.signer = Some("jason".to_string());
    env.signature_v2 = Some(envelope::sign_identity(key, &env));
    env.signature_v2_alg = Some("ed25519".to_string());
    env
}

#[test]
fn compat_mode_accepts_unsigned_and_reports_validity() {
    let (fx, key) = identity_fixture(IdentityMode::Compat);

    let plain = signed_envelope("jason", "scarlet", "ping", json!({}));
    assert!(!fx.bridge.receive_envelope(&plain).unwrap().identity_signature_valid);

    let with_identity = identity_signed(&key, "scarlet");
    assert!(fx.bridge.receive_envelope(&with_identity).unwrap().identity_signature_valid);
}

#[test]
fn compat_mode_accepts_invalid_identity_signature() {
    let (fx, key) = identity_fixture(IdentityMode::Compat);
    let mut env = identity_signed(&key, "scarlet");
    env.signature_v2 = Some("00".repeat(64));
    let accepted = fx.bridge.receive_envelope(&env).unwrap();
    assert!(!accepted.identity_signature_valid);
}

#[test]
fn provenance_mode_rejects_invalid_identity_signature() {
    let (fx, key) = identity_fixture(IdentityMode::Provenance);

    // Without v2: accepted.
    let plain = signed_envelope("jason", "scarlet", "ping", json!({}));
    assert!(fx.bridge.receive_envelope(&plain).is_ok());

    // With a broken v2: rejected.
    let mut env = identity_signed(&key, "scarlet");
    env.signature_v2 = Some("00".repeat(64));
    let err = fx.bridge.receive_envelope(&env).unwrap_err();
    assert!(err.to_string().contains("provenance"));
}

#[test]
fn strict_mode_requires_valid_identity_signature() {
    let (fx, key) = identity_fixture(IdentityMode::Strict);

    let plain = signed_envelope("jason", "scarlet", "ping", json!({}));
    assert!(fx.bridge.receive_envelope(&plain).is_err());

    let env = identity_signed(&key, "scarlet");
    assert!(fx.bridge.receive_envelope(&env).unwrap().identity_signature_valid);
}

// ── Relay ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_rejects_source_spoof_before_any_network_call() {
    // S6: relayer scarlet, inner claims source jason.
    let fx = fixture("scarlet", &[]);
    let inner = signed_envelope("jason", "kiera", "skills_checkin", json!({"q": "hello"}));
    let err = fx
        .bridge
        .forward_relay_envelope("scarlet", &inner)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("source mismatch"));
    assert!(fx.transport.hosts_called().is_empty(), "no network I/O on spoof");
    assert!(fx.log.recent(10).unwrap().is_empty(), "no relay record on spoof");
}

#[tokio::test]
async fn relay_forwards_valid_inner_envelope_without_burning_nonce() {
    let fx = fixture("jason", &[]);
    let inner = signed_envelope("scarlet", "kiera", "skills_checkin", json!({}));
    let outcome = fx
        .bridge
        .forward_relay_envelope("scarlet", &inner)
        .await
        .unwrap();
    assert!(outcome.forwarded);
    assert_eq!(outcome.target, "kiera");
    assert_eq!(fx.transport.hosts_called(), vec!["kiera.local"]);

    // The hub keeps a relay record but does not burn the nonce.
    let messages = fx.log.recent(10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, "relay");
    assert_eq!(messages[0].status, "forwarded_by:jason");
    assert!(!fx.log.nonce_seen(&inner.nonce).unwrap());
}

#[tokio::test]
async fn relay_rejects_tampered_inner_envelope() {
    let fx = fixture("jason", &[]);
    let mut inner = signed_envelope("scarlet", "kiera", "ping", json!({"a": 1}));
    inner.payload = json!({"a": 2});
    let err = fx
        .bridge
        .forward_relay_envelope("scarlet", &inner)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("signature invalid"));
    assert!(fx.transport.hosts_called().is_empty());
}

// ── Check-in scheduler ────────────────────────────────────────────────────────

fn scheduler(fx: &Fixture, tmp: &Path) -> CheckinScheduler {
    let store = MemoryStore::open_in_memory().unwrap();
    let episodic = EpisodicLog::new(store.conn());
    let skills = SkillManifest::open(&tmp.join("skills/manifest.yaml")).unwrap();
    CheckinScheduler::new(
        fx.bridge.clone(),
        episodic,
        skills,
        CheckinSettings { wake_period: Duration::from_millis(10), interval_seconds: 86_400 },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn checkin_round_sends_to_every_configured_peer_once() {
    let fx = fixture("scarlet", &[]);
    let tmp = fx._tmp.path().to_path_buf();
    let sched = scheduler(&fx, &tmp);

    let first = sched.send_due_checkins().await.unwrap();
    assert_eq!(first.len(), 2, "jason and kiera are both due");
    assert!(first.iter().all(|r| r.ok));

    let payload = &fx.transport.last_envelope().payload;
    assert_eq!(payload["kind"], "daily_skills_checkin");
    assert!(payload["question"].as_str().unwrap().contains("skills"));
    assert!(payload["requested_at"].as_i64().is_some());
    assert!(payload["skills_manifest"].is_array());

    // Immediately after, nobody is due.
    let second = sched.send_due_checkins().await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn checkin_failure_is_reported_not_fatal() {
    let fx = fixture("scarlet", &["kiera.local", "hub.local"]);
    let tmp = fx._tmp.path().to_path_buf();
    let sched = scheduler(&fx, &tmp);

    let results = sched.send_due_checkins().await.unwrap();
    let kiera = results.iter().find(|r| r.target == "kiera").unwrap();
    assert!(!kiera.ok);
    assert!(kiera.detail["error"].as_str().is_some());
}
