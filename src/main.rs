// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use haven_config::{ensure_profile_directories, load_profile, Profile};
use haven_interop::identity::ensure_identity_keys;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Start { profile, repo_root } => {
            let repo_root = resolve_repo_root(repo_root);
            let profile = load(&profile, &repo_root)?;
            haven_node::node::run(profile, &repo_root).await
        }
        Commands::ShowProfile { profile, repo_root } => {
            let repo_root = resolve_repo_root(repo_root);
            let profile = load(&profile, &repo_root)?;
            println!("name: {}", profile.name);
            println!("display_name: {}", profile.display_name);
            println!("policy_tier: {}", profile.policy_tier);
            println!("allowed_tool_tiers: {:?}", profile.allowed_tool_tiers);
            println!("health_port: {}", profile.health_port);
            println!("llm_default_model: {}", profile.llm_default_model);
            println!("public_readonly_mode: {}", profile.public_readonly_mode);
            println!("data_dir: {}", profile.paths.base_data_dir.display());
            Ok(())
        }
        Commands::Identity { profile, repo_root } => {
            let repo_root = resolve_repo_root(repo_root);
            let profile = load(&profile, &repo_root)?;
            ensure_profile_directories(&profile)?;
            let keys = ensure_identity_keys(&profile.paths.secrets_dir)?;
            println!("{}", keys.public_key_b64());
            println!();
            println!("Add to config/nodes.yaml under this node:");
            println!("  signing_public_key: \"{}\"", keys.public_key_b64());
            Ok(())
        }
    }
}

/// Load a profile; configuration problems are fatal with a non-zero exit.
fn load(profile_name: &str, repo_root: &Path) -> anyhow::Result<Profile> {
    Ok(load_profile(profile_name, repo_root)?)
}

fn resolve_repo_root(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
