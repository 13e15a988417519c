//! Status command - local records that differ from their snapshots

use std::path::Path;

use anyhow::Result;
use colored::{ColoredString, Colorize};

use super::open_store;
use crate::comment;
use crate::error::ParseError;
use crate::pull::display_order;
use crate::store::IssueStore;
use crate::types::issue::IssueNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    /// Temporary identifier, never pushed
    New,
    Modified,
    /// Canonical identifier without a snapshot
    Untracked,
    /// Snapshot without a local file; the next pull restores it
    Missing,
    Unchanged,
}

impl Change {
    fn label(self) -> &'static str {
        match self {
            Change::New => "new",
            Change::Modified => "modified",
            Change::Untracked => "untracked",
            Change::Missing => "missing",
            // only listed for its pending comment
            Change::Unchanged => "comment",
        }
    }

    /// Right-aligned, colored tag for the status column.
    fn tag(self) -> ColoredString {
        let text = format!("{:>9}", self.label());
        match self {
            Change::New => text.green(),
            Change::Modified => text.blue(),
            Change::Untracked => text.yellow(),
            Change::Missing => text.red(),
            Change::Unchanged => text.dimmed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusEntry {
    pub number: IssueNumber,
    pub title: String,
    pub path: String,
    pub change: Change,
    pub comment: bool,
}

pub(crate) fn collect(store: &IssueStore) -> Result<(Vec<StatusEntry>, Vec<ParseError>)> {
    let loaded = store.list()?;
    let comments = comment::load_all(store.paths());
    let mut entries = Vec::new();

    for local in &loaded.issues {
        let issue = &local.issue;
        let change = if issue.number.is_local() {
            Change::New
        } else {
            match store.read_original(&issue.number)? {
                None => Change::Untracked,
                Some(original) if original.same_content(issue) => Change::Unchanged,
                Some(_) => Change::Modified,
            }
        };
        let comment = comments.contains_key(&issue.number);
        if change != Change::Unchanged || comment {
            entries.push(StatusEntry {
                number: issue.number.clone(),
                title: issue.title.clone(),
                path: store.paths().relative(&local.path),
                change,
                comment,
            });
        }
    }

    let broken = loaded.broken_numbers();
    for number in store.original_numbers()? {
        if loaded.get(&number).is_some() || broken.contains(&number) {
            continue;
        }
        let title = store
            .read_original(&number)?
            .map(|o| o.title)
            .unwrap_or_default();
        entries.push(StatusEntry {
            path: store.paths().relative(&store.paths().original_path(&number)),
            comment: comments.contains_key(&number),
            number,
            title,
            change: Change::Missing,
        });
    }

    entries.sort_by(|a, b| display_order(&a.number, &b.number));
    Ok((entries, loaded.errors))
}

pub fn run(root: Option<&Path>) -> Result<()> {
    let store = open_store(root)?;
    let (entries, errors) = collect(&store)?;

    if entries.is_empty() {
        println!("{}", "No local changes".dimmed());
    }
    for entry in &entries {
        let mut line = format!(
            "{} {} {} {}",
            entry.change.tag(),
            format!("#{}", entry.number).cyan(),
            entry.title,
            entry.path.dimmed()
        );
        if entry.comment && entry.change != Change::Unchanged {
            line.push_str(&format!(" {}", "+comment".dimmed()));
        }
        println!("{line}");
    }
    for error in &errors {
        eprintln!("{} {error}", "Parse error:".red());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::init_store;
    use crate::config::paths::Paths;
    use crate::types::config::RepositoryConfig;
    use crate::types::issue::Issue;
    use std::fs;
    use tempfile::TempDir;

    fn issue(number: &str, title: &str) -> Issue {
        Issue {
            number: IssueNumber::from(number),
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_classifies_records() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::new(tmp.path().join(".issues"));
        init_store(&paths, RepositoryConfig::parse("octo/widgets").unwrap()).unwrap();
        let store = IssueStore::new(paths);

        for n in ["1", "2", "3", "10"] {
            let synced = issue(n, "Same");
            store.write_original(&synced).unwrap();
            if n != "3" {
                store.write(None, &synced).unwrap();
            }
        }
        let path = store.find("2").unwrap().path;
        store.write(Some(&path), &issue("2", "Edited")).unwrap();
        fs::write(store.paths().open_dir.join("10.comment.md"), "note").unwrap();
        store.write(None, &issue("Tnew1", "Draft")).unwrap();
        store.write(None, &issue("4", "Hand made")).unwrap();

        let (entries, errors) = collect(&store).unwrap();
        assert!(errors.is_empty());
        let summary: Vec<(&str, Change, bool)> = entries
            .iter()
            .map(|e| (e.number.as_str(), e.change, e.comment))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("2", Change::Modified, false),
                ("3", Change::Missing, false),
                ("4", Change::Untracked, false),
                ("10", Change::Unchanged, true),
                ("Tnew1", Change::New, false),
            ]
        );
    }
}
