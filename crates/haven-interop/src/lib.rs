// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Cross-node messaging for haven agents.
//!
//! Nodes exchange signed, replay-protected JSON envelopes over plain HTTP.
//! Every envelope carries an HMAC-SHA-256 signature under the federation's
//! shared key; nodes with an identity keypair additionally attach an
//! Ed25519 signature that proves *which* node produced the envelope.
//!
//! The [`bridge::InteropBridge`] orchestrates the whole flow: building and
//! signing outbound envelopes, direct delivery with hub fallback,
//! validation and replay defense on the inbound path, and hub-side
//! relaying.  The [`checkin::CheckinScheduler`] drives the daily
//! skills-check-in exchange on top of it.

pub mod bridge;
pub mod checkin;
pub mod envelope;
pub mod identity;
pub mod transport;

pub use bridge::{AcceptedEnvelope, InteropBridge, RelayOutcome, Route, SendOutcome};
pub use checkin::{CheckinScheduler, CheckinSettings};
pub use envelope::{Envelope, IdentityMode, MAX_CLOCK_SKEW_SECONDS};
pub use identity::IdentityKeys;
pub use transport::{EnvelopeTransport, HttpEnvelopeTransport};

use haven_memory::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InteropError {
    /// Missing or invalid local configuration (shared key, node directory,
    /// identity mode).  Fatal at startup, 500-class at runtime.
    #[error("configuration error: {0}")]
    Config(String),

    /// The envelope failed verification: bad signature, skew, replay,
    /// target mismatch, identity-mode violation or relay spoof.
    #[error("{0}")]
    Security(String),

    /// The peer could not be reached.  The auto route retries these via
    /// the hub; everything else is surfaced as-is.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered with a non-2xx status; its body is carried
    /// verbatim for the caller.
    #[error("peer rejected envelope (HTTP {status}): {body}")]
    PeerRejected { status: u16, body: String },

    #[error(transparent)]
    Storage(#[from] MemoryError),
}

impl From<haven_config::ConfigError> for InteropError {
    fn from(err: haven_config::ConfigError) -> Self {
        InteropError::Config(err.to_string())
    }
}
