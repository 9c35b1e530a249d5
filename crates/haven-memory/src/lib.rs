// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Embedded SQLite persistence for a haven node.
//!
//! One [`MemoryStore`] owns the database file and its schema; every other
//! store type ([`EpisodicLog`], [`ProfileFacts`], [`ProjectStore`],
//! [`ApprovalQueue`], [`InteropLog`], [`ApiUsageLedger`], [`VectorStore`])
//! borrows the same connection handle.  The connection is an explicit
//! dependency passed to each constructor — there are no process-wide
//! singletons.
//!
//! # Concurrency
//!
//! rusqlite connections are not `Sync`, so the connection lives behind a
//! `Mutex` and writers are serialized.  Every public write commits before
//! returning; the inbound-envelope path (nonce + inbox row) is the one
//! multi-statement transaction.
//!
//! # Migrations
//!
//! The schema is created on first open with `CREATE TABLE IF NOT EXISTS`;
//! columns added later ship as nullable/defaulted `ALTER TABLE`s that are
//! ignored when the column already exists.

mod api_usage;
mod approvals;
mod episodic;
mod facts;
mod interop;
mod projects;
mod store;
mod vector;

pub use api_usage::{ApiUsageLedger, UsageSummary};
pub use approvals::{ApprovalQueue, ApprovalRecord};
pub use episodic::{EpisodicEvent, EpisodicLog};
pub use facts::{ProfileFact, ProfileFacts};
pub use interop::{Direction, InteropLog, MessageRecord};
pub use projects::{ProjectItem, ProjectStore};
pub use store::{MemoryStore, SharedConn};
pub use vector::{EmbeddedChunk, VectorMatch, VectorStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("replay detected: nonce already seen")]
    DuplicateNonce,

    #[error("invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
