//! New command - draft an issue locally under a temporary identifier

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use colored::Colorize;
use rand::Rng;

use super::open_store;
use crate::remap::generate_local_id;
use crate::store::IssueStore;
use crate::types::enums::IssueState;
use crate::types::issue::Issue;

/// Write a new open record and return its path.
pub(crate) fn create<R: Rng + ?Sized>(
    store: &IssueStore,
    rng: &mut R,
    title: &str,
    body: &str,
    labels: Vec<String>,
) -> Result<(Issue, PathBuf)> {
    if title.trim().is_empty() {
        bail!("title must not be empty");
    }
    let used = store.used_numbers()?;
    let issue = Issue {
        number: generate_local_id(rng, &used),
        title: title.to_string(),
        body: body.to_string(),
        labels,
        state: IssueState::Open,
        ..Default::default()
    }
    .normalized();
    let path = store.write(None, &issue)?;
    Ok((issue, path))
}

pub fn run(root: Option<&Path>, title: &str, body: Option<&str>, labels: Vec<String>) -> Result<()> {
    let store = open_store(root)?;
    let (issue, path) = create(
        &store,
        &mut rand::thread_rng(),
        title,
        body.unwrap_or_default(),
        labels,
    )?;

    println!(
        "{} Created {} {}",
        "✓".green(),
        issue.number.to_string().cyan(),
        store.paths().relative(&path).dimmed()
    );
    println!(
        "{}",
        "It gets a real number on the next `issue-sync push`.".dimmed()
    );
    Ok(())
}
