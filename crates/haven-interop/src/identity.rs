// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-node Ed25519 identity keys.
//!
//! The private key is 32 raw bytes stored base64-encoded in the secrets
//! directory with mode 0o600; the matching public key is stored alongside
//! it so operators can paste it into `nodes.yaml` as
//! `signing_public_key`.  Keys are generated on first start and reused
//! afterwards.

use std::path::Path;

use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::envelope::IdentityMode;
use crate::InteropError;

const PRIVATE_KEY_FILE: &str = "interop_signing_private_key.b64";
const PUBLIC_KEY_FILE: &str = "interop_signing_public_key.b64";
const IDENTITY_MODE_FILE: &str = "interop_identity_mode.txt";
pub const SHARED_KEY_FILE: &str = "interop_shared_key.txt";

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// The node's own signing keypair.
#[derive(Clone)]
pub struct IdentityKeys {
    signing: SigningKey,
}

impl IdentityKeys {
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Base64 of the raw 32-byte public key — the `signing_public_key`
    /// value peers put in their node directory.
    pub fn public_key_b64(&self) -> String {
        b64().encode(self.verifying_key().to_bytes())
    }
}

/// Load the identity keypair, generating and persisting one if absent.
pub fn ensure_identity_keys(secrets_dir: &Path) -> Result<IdentityKeys, InteropError> {
    let private_path = secrets_dir.join(PRIVATE_KEY_FILE);
    if private_path.exists() {
        return load_identity_keys(secrets_dir)?.ok_or_else(|| {
            InteropError::Config(format!("unreadable identity key: {}", private_path.display()))
        });
    }

    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let signing = SigningKey::from_bytes(&seed);
    let keys = IdentityKeys { signing };

    std::fs::create_dir_all(secrets_dir)
        .map_err(|e| InteropError::Config(format!("creating {}: {e}", secrets_dir.display())))?;
    write_secret_file(&private_path, format!("{}\n", b64().encode(seed)).as_bytes())?;
    write_secret_file(
        &secrets_dir.join(PUBLIC_KEY_FILE),
        format!("{}\n", keys.public_key_b64()).as_bytes(),
    )?;
    Ok(keys)
}

/// Load the identity keypair if its files exist; `Ok(None)` when the node
/// has no identity key (HMAC-only operation).
pub fn load_identity_keys(secrets_dir: &Path) -> Result<Option<IdentityKeys>, InteropError> {
    let private_path = secrets_dir.join(PRIVATE_KEY_FILE);
    if !private_path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&private_path)
        .map_err(|e| InteropError::Config(format!("reading {}: {e}", private_path.display())))?;
    let bytes = b64()
        .decode(raw.trim())
        .map_err(|e| InteropError::Config(format!("decoding {}: {e}", private_path.display())))?;
    let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        InteropError::Config(format!(
            "identity key must be 32 bytes: {}",
            private_path.display()
        ))
    })?;
    Ok(Some(IdentityKeys { signing: SigningKey::from_bytes(&seed) }))
}

/// Read the node's identity mode from the secrets directory.
///
/// A missing file means `compat`; anything other than the three known
/// modes is a configuration error rather than a silent fallback.
pub fn load_identity_mode(secrets_dir: &Path) -> Result<IdentityMode, InteropError> {
    let path = secrets_dir.join(IDENTITY_MODE_FILE);
    if !path.exists() {
        return Ok(IdentityMode::Compat);
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| InteropError::Config(format!("reading {}: {e}", path.display())))?;
    IdentityMode::parse(&raw)
}

/// Persist the identity mode (written from the profile at boot).
pub fn store_identity_mode(secrets_dir: &Path, mode: IdentityMode) -> Result<(), InteropError> {
    std::fs::create_dir_all(secrets_dir)
        .map_err(|e| InteropError::Config(format!("creating {}: {e}", secrets_dir.display())))?;
    let path = secrets_dir.join(IDENTITY_MODE_FILE);
    std::fs::write(&path, format!("{}\n", mode.as_str()))
        .map_err(|e| InteropError::Config(format!("writing {}: {e}", path.display())))
}

/// Read the shared HMAC key; missing or empty is a configuration error.
pub fn load_shared_key(secrets_dir: &Path) -> Result<Vec<u8>, InteropError> {
    let path = secrets_dir.join(SHARED_KEY_FILE);
    if !path.exists() {
        return Err(InteropError::Config(format!(
            "missing shared interop key: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| InteropError::Config(format!("reading {}: {e}", path.display())))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InteropError::Config(format!(
            "empty shared interop key: {}",
            path.display()
        )));
    }
    Ok(trimmed.as_bytes().to_vec())
}

/// Write `data` to `path` with mode 0o600 on Unix (owner-read/write only).
fn write_secret_file(path: &Path, data: &[u8]) -> Result<(), InteropError> {
    let io_err = |e: std::io::Error| {
        InteropError::Config(format!("writing secret file {}: {e}", path.display()))
    };
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(io_err)?;
        f.write_all(data).map_err(io_err)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data).map_err(io_err)?;
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
