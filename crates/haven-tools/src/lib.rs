// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tools and the policy-gated registry that runs them.
//!
//! A tool declares a capability tier and executes a JSON payload.  The
//! [`ToolRegistry`] is the only way tools run: it checks the profile's
//! policy first, queues tier-1/2 calls for approval, and records every
//! decision in the episodic log.  Approved calls are executed exactly
//! once — re-running an executed approval returns the stored result.

pub mod builtin;
mod registry;
mod sandbox;
mod tool;

pub use registry::ToolRegistry;
pub use sandbox::{Sandbox, SandboxError};
pub use tool::{QueryEmbedder, Tool, ToolOutcome};
