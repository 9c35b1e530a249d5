// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The signed envelope wire format and its canonical serialization.
//!
//! # Canonical form
//!
//! The bytes that both signatures cover are the compact JSON serialization
//! of exactly `{source, target, task_type, payload, nonce, timestamp}`
//! with lexicographically sorted keys and no insignificant whitespace.
//! `serde_json`'s default map is a BTreeMap, so nested `payload` objects
//! sort the same way on every node.
//!
//! # Signatures
//!
//! - `signature` (required): lowercase hex HMAC-SHA-256 under the
//!   federation's shared key.  Verification is constant-time.
//! - `signature_v2` (optional): hex Ed25519 over the same canonical
//!   bytes, provenance for the node named by `signer` (default: the
//!   `source` field).  How strictly v2 is enforced is the receiving
//!   node's [`IdentityMode`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::InteropError;

/// Envelopes whose timestamp is further than this from local time are
/// rejected.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 300;

pub const SIGNATURE_V2_ALG: &str = "ed25519";

type HmacSha256 = Hmac<Sha256>;

/// The signed message unit exchanged between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub source: String,
    pub target: String,
    pub task_type: String,
    pub payload: Value,
    /// 16 random bytes, hex-encoded.
    pub nonce: String,
    /// Seconds since epoch at send time.
    pub timestamp: i64,
    /// Hex HMAC-SHA-256 over the canonical form.
    pub signature: String,
    /// Identity claimed by `signature_v2`; defaults to `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_v2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_v2_alg: Option<String>,
}

impl Envelope {
    /// A fresh, unsigned envelope with a random nonce and the current
    /// timestamp.  Call [`sign_hmac`] (and optionally [`sign_identity`])
    /// before putting it on the wire.
    pub fn unsigned(source: &str, target: &str, task_type: &str, payload: Value) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            task_type: task_type.to_string(),
            payload,
            nonce: generate_nonce(),
            timestamp: now_epoch(),
            signature: String::new(),
            signer: None,
            signature_v2: None,
            signature_v2_alg: None,
        }
    }

    /// Is the timestamp within the allowed skew window of local time?
    pub fn within_skew_window(&self) -> bool {
        (now_epoch() - self.timestamp).abs() <= MAX_CLOCK_SKEW_SECONDS
    }
}

/// 16 random bytes from the OS CSPRNG, hex-encoded (32 chars).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The canonical byte string both signatures cover.
pub fn canonical_bytes(envelope: &Envelope) -> Vec<u8> {
    json!({
        "source": envelope.source,
        "target": envelope.target,
        "task_type": envelope.task_type,
        "payload": envelope.payload,
        "nonce": envelope.nonce,
        "timestamp": envelope.timestamp,
    })
    .to_string()
    .into_bytes()
}

/// HMAC-SHA-256 over the canonical form, lowercase hex.
pub fn sign_hmac(shared_key: &[u8], envelope: &Envelope) -> String {
    let mut mac =
        HmacSha256::new_from_slice(shared_key).expect("HMAC accepts keys of any length");
    mac.update(&canonical_bytes(envelope));
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of the envelope's `signature` field.
pub fn verify_hmac(shared_key: &[u8], envelope: &Envelope) -> bool {
    let expected = sign_hmac(shared_key, envelope);
    bool::from(expected.as_bytes().ct_eq(envelope.signature.as_bytes()))
}

/// Ed25519 over the canonical form, hex-encoded.
pub fn sign_identity(key: &SigningKey, envelope: &Envelope) -> String {
    hex::encode(key.sign(&canonical_bytes(envelope)).to_bytes())
}

/// Verify an identity signature against a base64 raw-32-byte public key
/// (the encoding nodes publish in the node directory).
pub fn verify_identity(public_key_b64: &str, envelope: &Envelope, signature_hex: &str) -> bool {
    use base64::Engine;
    let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(public_key_b64.trim()) else {
        return false;
    };
    let Ok(raw32) = <[u8; 32]>::try_from(raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw32) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(&canonical_bytes(envelope), &signature).is_ok()
}

/// How strictly inbound envelopes must prove their signer's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityMode {
    /// Accept with or without a v2 signature, even an invalid one.
    #[default]
    Compat,
    /// Accept without v2; reject a v2 that fails to verify.
    Provenance,
    /// Require a valid v2 signature.
    Strict,
}

impl IdentityMode {
    pub fn parse(raw: &str) -> Result<Self, InteropError> {
        match raw.trim() {
            "compat" => Ok(IdentityMode::Compat),
            "provenance" => Ok(IdentityMode::Provenance),
            "strict" => Ok(IdentityMode::Strict),
            other => Err(InteropError::Config(format!(
                "unknown interop identity mode: '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityMode::Compat => "compat",
            IdentityMode::Provenance => "provenance",
            IdentityMode::Strict => "strict",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-key";

    fn signed(payload: Value) -> Envelope {
        let mut env = Envelope::unsigned("scarlet", "kiera", "skills_checkin", payload);
        env.signature = sign_hmac(KEY, &env);
        env
    }

    #[test]
    fn canonical_form_is_sorted_and_compact() {
        let mut env = Envelope::unsigned("a", "b", "t", json!({"z": 1, "a": 2}));
        env.nonce = "00".repeat(16);
        env.timestamp = 1700000000;
        let text = String::from_utf8(canonical_bytes(&env)).unwrap();
        assert_eq!(
            text,
            "{\"nonce\":\"00000000000000000000000000000000\",\
              \"payload\":{\"a\":2,\"z\":1},\"source\":\"a\",\"target\":\"b\",\
              \"task_type\":\"t\",\"timestamp\":1700000000}"
                .replace(' ', "")
        );
    }

    #[test]
    fn canonical_form_excludes_signature_fields() {
        let mut env = signed(json!({}));
        let before = canonical_bytes(&env);
        env.signature = "ff".repeat(32);
        env.signer = Some("scarlet".into());
        env.signature_v2 = Some("aa".into());
        assert_eq!(before, canonical_bytes(&env));
    }

    #[test]
    fn hmac_round_trips() {
        let env = signed(json!({"question": "hi"}));
        assert!(verify_hmac(KEY, &env));
    }

    #[test]
    fn hmac_detects_payload_tamper() {
        let mut env = signed(json!({"question": "hi"}));
        env.payload = json!({"question": "bye"});
        assert!(!verify_hmac(KEY, &env));
    }

    #[test]
    fn hmac_detects_nonce_tamper() {
        let mut env = signed(json!({}));
        env.nonce = generate_nonce();
        assert!(!verify_hmac(KEY, &env));
    }

    #[test]
    fn hmac_detects_timestamp_tamper() {
        let mut env = signed(json!({}));
        env.timestamp += 1;
        assert!(!verify_hmac(KEY, &env));
    }

    #[test]
    fn hmac_rejects_wrong_key() {
        let env = signed(json!({}));
        assert!(!verify_hmac(b"other-key", &env));
    }

    #[test]
    fn nonce_is_32_hex_chars() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn skew_window_bounds() {
        let mut env = signed(json!({}));
        env.timestamp = now_epoch() - MAX_CLOCK_SKEW_SECONDS + 5;
        assert!(env.within_skew_window());
        env.timestamp = now_epoch() - MAX_CLOCK_SKEW_SECONDS - 5;
        assert!(!env.within_skew_window());
        env.timestamp = now_epoch() + MAX_CLOCK_SKEW_SECONDS + 5;
        assert!(!env.within_skew_window());
    }

    #[test]
    fn identity_signature_round_trips() {
        use base64::Engine;
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key.verifying_key().to_bytes());

        let env = signed(json!({"x": 1}));
        let sig = sign_identity(&key, &env);
        assert!(verify_identity(&public_b64, &env, &sig));
    }

    #[test]
    fn identity_signature_fails_for_other_key() {
        use base64::Engine;
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        seed[0] ^= 0xff;
        let other = SigningKey::from_bytes(&seed);
        let other_b64 =
            base64::engine::general_purpose::STANDARD.encode(other.verifying_key().to_bytes());

        let env = signed(json!({}));
        let sig = sign_identity(&signing, &env);
        assert!(!verify_identity(&other_b64, &env, &sig));
    }

    #[test]
    fn identity_verify_tolerates_garbage_inputs() {
        let env = signed(json!({}));
        assert!(!verify_identity("not base64!!", &env, "00"));
        assert!(!verify_identity("AAAA", &env, "zz"));
    }

    #[test]
    fn wire_format_field_names() {
        let mut env = signed(json!({}));
        env.signer = Some("scarlet".into());
        env.signature_v2 = Some("aa".into());
        env.signature_v2_alg = Some(SIGNATURE_V2_ALG.into());
        let wire = serde_json::to_value(&env).unwrap();
        for field in [
            "source", "target", "task_type", "payload", "nonce", "timestamp", "signature",
            "signer", "signature_v2", "signature_v2_alg",
        ] {
            assert!(wire.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let wire = serde_json::to_value(signed(json!({}))).unwrap();
        assert!(wire.get("signer").is_none());
        assert!(wire.get("signature_v2").is_none());
    }

    #[test]
    fn identity_mode_parse() {
        assert_eq!(IdentityMode::parse("compat").unwrap(), IdentityMode::Compat);
        assert_eq!(IdentityMode::parse(" strict \n").unwrap(), IdentityMode::Strict);
        assert!(IdentityMode::parse("loose").is_err());
    }
}
