// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Minimal OpenAI-compatible LLM collaborator client.
//!
//! Chat completions power the auto-reply to inbound skills check-ins;
//! embeddings power `idea_search`.  Secrets are single-line text files in
//! the profile's secrets directory:
//!
//! - `llm_api_key.txt` (fallback: `openai_api_key.txt`)
//! - `llm_base_url.txt` (optional, e.g. an Ollama endpoint)
//! - `embedding_model.txt` (optional)
//!
//! The node runs fine without any of them — callers degrade to an
//! explicit "LLM key missing" result.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use haven_tools::QueryEmbedder;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const MAX_CONTENT_CHARS: usize = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Read the single-line content of a secret file; `None` when the file
/// is missing or blank.  Trailing newlines are tolerated.
pub fn read_secret(secrets_dir: &Path, filename: &str) -> Option<String> {
    let raw = std::fs::read_to_string(secrets_dir.join(filename)).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// Build a client from the secrets directory; `None` when no API key
    /// is configured.
    pub fn from_secrets(secrets_dir: &Path, default_model: &str) -> Option<Self> {
        let api_key = read_secret(secrets_dir, "llm_api_key.txt")
            .or_else(|| read_secret(secrets_dir, "openai_api_key.txt"))?;
        let base_url = read_secret(secrets_dir, "llm_base_url.txt")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Some(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with static configuration"),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: default_model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat-completion round trip.  Returns the (length-capped)
    /// content plus token usage for the ledger.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> anyhow::Result<(String, Usage)> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": max_tokens,
            }))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let body = response.text().await.context("reading LLM response")?;
        if !status.is_success() {
            bail!("LLM API HTTP {status}: {body}");
        }
        let data: Value = serde_json::from_str(&body).context("parsing LLM response")?;

        let content = data["choices"]
            .as_array()
            .and_then(|choices| {
                choices
                    .iter()
                    .find_map(|c| c["message"]["content"].as_str())
            })
            .with_context(|| format!("LLM API unexpected response: {data}"))?;

        let mut content = content.trim().to_string();
        if content.chars().count() > MAX_CONTENT_CHARS {
            content = content.chars().take(MAX_CONTENT_CHARS - 3).collect::<String>() + "...";
        }
        let usage: Usage = serde_json::from_value(data["usage"].clone()).unwrap_or_default();
        Ok((content, usage))
    }
}

pub struct EmbeddingsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingsClient {
    pub fn from_secrets(secrets_dir: &Path) -> Option<Self> {
        let api_key = read_secret(secrets_dir, "llm_api_key.txt")
            .or_else(|| read_secret(secrets_dir, "openai_api_key.txt"))?;
        let base_url = read_secret(secrets_dir, "llm_base_url.txt")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = read_secret(secrets_dir, "embedding_model.txt")
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());
        Some(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with static configuration"),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl QueryEmbedder for EmbeddingsClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f64>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let body = response.text().await.context("reading embeddings response")?;
        if !status.is_success() {
            bail!("Embeddings API HTTP {status}: {body}");
        }
        let data: Value = serde_json::from_str(&body).context("parsing embeddings response")?;
        let vector = data["data"][0]["embedding"]
            .as_array()
            .with_context(|| format!("Embeddings API returned no vectors: {data}"))?;
        vector
            .iter()
            .map(|v| v.as_f64().context("non-numeric embedding component"))
            .collect()
    }
}

/// Split text into overlapping chunks for embedding.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let raw = text.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= chunk_size {
        return vec![raw.to_string()];
    }
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        start += step;
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_secret_trims_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("llm_api_key.txt"), "sk-test\n").unwrap();
        assert_eq!(read_secret(tmp.path(), "llm_api_key.txt").as_deref(), Some("sk-test"));
    }

    #[test]
    fn read_secret_treats_blank_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("k.txt"), "   \n").unwrap();
        assert!(read_secret(tmp.path(), "k.txt").is_none());
        assert!(read_secret(tmp.path(), "absent.txt").is_none());
    }

    #[test]
    fn llm_client_requires_an_api_key() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(LlmClient::from_secrets(tmp.path(), "gpt-4o-mini").is_none());
        std::fs::write(tmp.path().join("openai_api_key.txt"), "sk-x\n").unwrap();
        assert!(LlmClient::from_secrets(tmp.path(), "gpt-4o-mini").is_some());
    }

    #[test]
    fn chunk_text_short_input_is_one_chunk() {
        assert_eq!(chunk_text("hello", 800, 120), vec!["hello"]);
        assert!(chunk_text("   ", 800, 120).is_empty());
    }

    #[test]
    fn chunk_text_overlaps() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, 4, 2);
        assert_eq!(chunks[0], "abcd");
        assert_eq!(chunks[1], "cdef");
        // Every chunk except possibly the last is full-size.
        assert!(chunks.iter().rev().skip(1).all(|c| c.len() == 4));
    }
}
