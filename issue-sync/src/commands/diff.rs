//! Diff command - local edits against the last synced snapshot

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use super::open_store;
use crate::diff::{summarize_changes, FieldChange};
use crate::pull::display_order;
use crate::render::{field_change, unified_diff};
use crate::store::{IssueStore, LocalIssue};
use crate::types::issue::Issue;

/// Diff lines for one record, empty when it matches its snapshot.
fn record_diff(store: &IssueStore, local: &LocalIssue) -> Result<Vec<String>> {
    let issue = &local.issue;
    let path = store.paths().relative(&local.path);
    let (baseline, heading) = if issue.number.is_local() {
        let empty = Issue {
            number: issue.number.clone(),
            ..Default::default()
        };
        (empty, "new")
    } else {
        match store.read_original(&issue.number)? {
            Some(original) => (original, "modified"),
            None => {
                return Ok(vec![format!(
                    "{} {} {}",
                    format!("#{}", issue.number).cyan(),
                    issue.title,
                    "(no snapshot, pull first)".yellow()
                )])
            }
        }
    };

    let changes = summarize_changes(&baseline, issue);
    if changes.is_empty() {
        return Ok(Vec::new());
    }

    let mut lines = vec![format!(
        "{} {} {}",
        format!("#{} {}", issue.number, issue.title).bold(),
        format!("({heading})").dimmed(),
        path.dimmed()
    )];
    for change in &changes {
        if !matches!(change, FieldChange::Body { .. }) {
            lines.push(format!("  {}", field_change(change)));
        }
    }
    if baseline.body != issue.body {
        let old_label = if issue.number.is_local() {
            "/dev/null".to_string()
        } else {
            format!("snapshot/{}.md", issue.number)
        };
        lines.extend(unified_diff(&baseline.body, &issue.body, &old_label, &path));
    }
    Ok(lines)
}

pub(crate) fn render(store: &IssueStore, targets: &[String]) -> Result<Vec<String>> {
    let loaded = store.list()?;
    let numbers = store.resolve_targets(targets)?;
    let mut selected: Vec<&LocalIssue> = if numbers.is_empty() {
        loaded.issues.iter().collect()
    } else {
        loaded.select(&numbers)?
    };
    selected.sort_by(|a, b| display_order(&a.issue.number, &b.issue.number));

    let mut lines = Vec::new();
    for local in selected {
        let diff = record_diff(store, local)?;
        if diff.is_empty() {
            continue;
        }
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.extend(diff);
    }
    Ok(lines)
}

pub fn run(root: Option<&Path>, targets: &[String]) -> Result<()> {
    let store = open_store(root)?;
    let lines = render(&store, targets)?;
    if lines.is_empty() {
        println!("{}", "No local changes".dimmed());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
