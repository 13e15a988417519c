//! Pending comments: `<id>.comment.md` side-files queued for the next push.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::config::paths::Paths;
use crate::issue_file::COMMENT_EXTENSION;
use crate::types::enums::IssueState;
use crate::types::issue::IssueNumber;

fn comment_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+|T[a-zA-Z0-9]+)(?:-[^.]+)?\.comment\.md$").expect("valid regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComment {
    pub number: IssueNumber,
    /// Trimmed, never empty
    pub body: String,
    pub path: PathBuf,
}

fn read_body(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let body = content.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Look in one directory: `<id>.comment.md` first, then the first
/// `<id>-*.comment.md` in name order.
fn find_in_dir(dir: &Path, number: &IssueNumber) -> Option<PendingComment> {
    let preferred = dir.join(format!("{number}{COMMENT_EXTENSION}"));
    if preferred.is_file() {
        return read_body(&preferred).map(|body| PendingComment {
            number: number.clone(),
            body,
            path: preferred,
        });
    }

    let prefix = format!("{number}-");
    let mut matches: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
        .filter(|name| name.starts_with(&prefix) && name.ends_with(COMMENT_EXTENSION))
        .collect();
    matches.sort();
    let path = dir.join(matches.first()?);
    read_body(&path).map(|body| PendingComment {
        number: number.clone(),
        body,
        path,
    })
}

/// Pending comment for a record, checking its own state directory before the
/// other one.
pub fn find(paths: &Paths, number: &IssueNumber, state: IssueState) -> Option<PendingComment> {
    find_in_dir(paths.dir_for_state(state), number)
        .or_else(|| find_in_dir(paths.dir_for_state(state.other()), number))
}

/// Every non-empty pending comment in the store, keyed by identifier. Within
/// a directory each identifier resolves the way [`find`] does; the open
/// directory wins over the closed one.
pub fn load_all(paths: &Paths) -> BTreeMap<IssueNumber, PendingComment> {
    let mut comments = BTreeMap::new();
    for state in [IssueState::Open, IssueState::Closed] {
        let dir = paths.dir_for_state(state);
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let numbers: BTreeSet<IssueNumber> = entries
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .filter_map(|name| {
                let captures = comment_file_pattern().captures(&name)?;
                Some(IssueNumber::new(&captures[1]))
            })
            .collect();

        for number in numbers {
            if comments.contains_key(&number) {
                continue;
            }
            if let Some(comment) = find_in_dir(dir, &number) {
                comments.insert(number, comment);
            }
        }
    }
    comments
}

/// Remove a comment file after it was posted.
pub fn delete(comment: &PendingComment) -> Result<()> {
    match fs::remove_file(&comment.path) {
        Ok(()) => {
            debug!("deleted posted comment {}", comment.path.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to delete {}", comment.path.display()))
        }
    }
}

/// Move a comment file to the name of a newly assigned identifier, keeping
/// any slug suffix.
pub fn rekey(comment: &PendingComment, new_number: &IssueNumber) -> Result<PendingComment> {
    let file_name = comment
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let old_prefix = comment.number.as_str();
    let suffix = file_name.strip_prefix(old_prefix).unwrap_or(COMMENT_EXTENSION);
    let new_path = comment.path.with_file_name(format!("{new_number}{suffix}"));

    fs::rename(&comment.path, &new_path).with_context(|| {
        format!(
            "Failed to rename {} -> {}",
            comment.path.display(),
            new_path.display()
        )
    })?;
    Ok(PendingComment {
        number: new_number.clone(),
        body: comment.body.clone(),
        path: new_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(tmp: &TempDir) -> Paths {
        let paths = Paths::new(tmp.path().join(".issues"));
        fs::create_dir_all(&paths.open_dir).unwrap();
        fs::create_dir_all(&paths.closed_dir).unwrap();
        paths
    }

    #[test]
    fn test_find_prefers_exact_name() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("42-slug.comment.md"), "Slug comment").unwrap();
        fs::write(paths.open_dir.join("42.comment.md"), "Preferred\n").unwrap();

        let comment = find(&paths, &IssueNumber::from("42"), IssueState::Open).unwrap();
        assert_eq!(comment.body, "Preferred");
        assert!(comment.path.ends_with("42.comment.md"));
    }

    #[test]
    fn test_load_all_prefers_exact_name() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("5-bug.comment.md"), "slugged").unwrap();
        fs::write(paths.open_dir.join("5.comment.md"), "exact").unwrap();

        let all = load_all(&paths);
        let comment = &all[&IssueNumber::from("5")];
        assert_eq!(comment.body, "exact");
        assert_eq!(
            Some(comment.clone()),
            find(&paths, &IssueNumber::from("5"), IssueState::Open)
        );
    }

    #[test]
    fn test_find_falls_back_to_first_glob_match() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("42-b.comment.md"), "second").unwrap();
        fs::write(paths.open_dir.join("42-a.comment.md"), "first").unwrap();
        fs::write(paths.open_dir.join("420.comment.md"), "other issue").unwrap();

        let comment = find(&paths, &IssueNumber::from("42"), IssueState::Open).unwrap();
        assert_eq!(comment.body, "first");
    }

    #[test]
    fn test_find_checks_other_directory() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.closed_dir.join("7.comment.md"), "from closed").unwrap();

        let comment = find(&paths, &IssueNumber::from("7"), IssueState::Open).unwrap();
        assert_eq!(comment.body, "from closed");
        assert!(find(&paths, &IssueNumber::from("8"), IssueState::Open).is_none());
    }

    #[test]
    fn test_whitespace_only_comment_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("3.comment.md"), "  \n\t\n").unwrap();

        assert!(find(&paths, &IssueNumber::from("3"), IssueState::Open).is_none());
        assert!(load_all(&paths).is_empty());
    }

    #[test]
    fn test_load_all() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("1.comment.md"), "one").unwrap();
        fs::write(paths.open_dir.join("Tabc-draft.comment.md"), "local").unwrap();
        fs::write(paths.closed_dir.join("2-done.comment.md"), "two").unwrap();
        fs::write(paths.open_dir.join("notes.comment.md"), "ignored").unwrap();
        fs::write(paths.open_dir.join("1-fix.md"), "---\nnumber: 1\n---\n").unwrap();

        let all = load_all(&paths);
        let keys: Vec<&str> = all.keys().map(IssueNumber::as_str).collect();
        assert_eq!(keys, vec!["1", "2", "Tabc"]);
        assert_eq!(all[&IssueNumber::from("Tabc")].body, "local");
    }

    #[test]
    fn test_delete_and_rekey() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        fs::write(paths.open_dir.join("Tx1-draft.comment.md"), "hello").unwrap();
        let comment = find(&paths, &IssueNumber::from("Tx1"), IssueState::Open).unwrap();

        let moved = rekey(&comment, &IssueNumber::from("101")).unwrap();
        assert!(moved.path.ends_with("101-draft.comment.md"));
        assert!(!comment.path.exists());

        delete(&moved).unwrap();
        assert!(!moved.path.exists());
        delete(&moved).unwrap();
    }
}
