// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A federation of personal agent nodes.
#[derive(Parser, Debug)]
#[command(name = "haven", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (overrides RUST_LOG to debug).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a node: control surface, tool engine, interop bridge and
    /// the daily check-in scheduler.
    Start {
        /// Profile name, e.g. `scarlet` (loads config/profiles/<name>.yaml).
        #[arg(long, short = 'p')]
        profile: String,
        /// Repository root holding config/ and scripts/ (default: cwd).
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },

    /// Print the resolved profile configuration and exit.
    ShowProfile {
        #[arg(long, short = 'p')]
        profile: String,
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },

    /// Ensure the node's Ed25519 identity keys exist and print the
    /// public key (base64) for the federation node directory.
    Identity {
        #[arg(long, short = 'p')]
        profile: String,
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
}
