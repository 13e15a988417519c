//! CLI subcommands. Each resolves the store, does its work, and prints a
//! colored summary.

pub mod diff;
pub mod init;
pub mod new;
pub mod pull;
pub mod push;
pub mod status;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::{config_exists, read_config_with_env, resolve_paths, validate_config};
use crate::error::SyncError;
use crate::remote::GitHubClient;
use crate::store::IssueStore;

/// Open an initialized store at `root`, or the nearest one above the working
/// directory.
pub(crate) fn open_store(root: Option<&Path>) -> Result<IssueStore> {
    let paths = resolve_paths(root);
    if !config_exists(&paths) {
        return Err(SyncError::NotInitialized.into());
    }
    debug!("using store {}", paths.root.display());
    Ok(IssueStore::new(paths))
}

/// GitHub client for the store's configured repository.
pub(crate) fn connect(store: &IssueStore) -> Result<GitHubClient> {
    let config = read_config_with_env(&store.paths().config_path)?;
    validate_config(&config)?;
    Ok(GitHubClient::new(&config.repository)?)
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

/// Token cancelled by the first Ctrl-C. A second one exits immediately.
pub(crate) fn cancel_on_interrupt() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    let installed = ctrlc::set_handler(move || {
        if handle.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("{}", "Interrupted, stopping after the current call...".yellow());
        handle.cancel();
    });
    if let Err(e) = installed {
        debug!("Ctrl-C handler not installed: {e}");
    }
    token
}

/// Spinner on stderr; hidden when stderr is not a terminal.
pub(crate) fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
