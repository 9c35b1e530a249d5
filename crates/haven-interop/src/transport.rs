// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Envelope delivery over HTTP.
//!
//! The bridge never talks to the network directly — it goes through
//! [`EnvelopeTransport`], so the router's hub-fallback logic can be
//! driven by an explicit [`crate::InteropError::Transport`] result
//! instead of exception unwinding, and tests can swap in a recording
//! mock.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::envelope::Envelope;
use crate::InteropError;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers one envelope to one peer's inbox.
#[async_trait]
pub trait EnvelopeTransport: Send + Sync {
    /// POST `{"envelope": …}` to `http://<host>:<port>/interop/inbox` and
    /// return the peer's JSON response body.
    async fn post_envelope(
        &self,
        host: &str,
        port: u16,
        envelope: &Envelope,
    ) -> Result<Value, InteropError>;
}

/// The production transport: plain HTTP POST via reqwest.
pub struct HttpEnvelopeTransport {
    client: reqwest::Client,
}

impl HttpEnvelopeTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client with static configuration");
        Self { client }
    }
}

impl Default for HttpEnvelopeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvelopeTransport for HttpEnvelopeTransport {
    async fn post_envelope(
        &self,
        host: &str,
        port: u16,
        envelope: &Envelope,
    ) -> Result<Value, InteropError> {
        let url = format!("http://{host}:{port}/interop/inbox");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "envelope": envelope }))
            .send()
            .await
            .map_err(|e| InteropError::Transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InteropError::Transport(format!("reading response from {url}: {e}")))?;
        if !status.is_success() {
            return Err(InteropError::PeerRejected {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| InteropError::Transport(format!("invalid JSON from {url}: {e}")))
    }
}
