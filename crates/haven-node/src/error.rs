// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] haven_config::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] haven_memory::MemoryError),

    #[error("interop error: {0}")]
    Interop(#[from] haven_interop::InteropError),

    #[error("policy error: {0}")]
    Policy(#[from] haven_policy::PolicyError),

    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}
