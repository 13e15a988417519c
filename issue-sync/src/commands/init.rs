//! Init command - create the store layout and config

use std::path::Path;

use anyhow::{anyhow, Result};
use colored::Colorize;

use crate::config::{init_store, resolve_paths};
use crate::types::config::RepositoryConfig;

pub fn run(root: Option<&Path>, repo: &str) -> Result<()> {
    let repository = RepositoryConfig::parse(repo)
        .ok_or_else(|| anyhow!("--repo must look like owner/repo, got '{repo}'"))?;
    let paths = resolve_paths(root);
    let config = init_store(&paths, repository)?;

    println!(
        "{} Initialized issue store for {}",
        "✓".green(),
        config.repository.slug().cyan()
    );
    println!("{}", format!("  {}", paths.root.display()).dimmed());
    println!("{}", "Run `issue-sync pull` to fetch issues.".dimmed());
    Ok(())
}
