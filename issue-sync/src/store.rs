//! Record Store: local issue files under `open/` and `closed/` plus the
//! original snapshots under `.sync/originals/`.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::paths::Paths;
use crate::error::{ParseError, SyncError};
use crate::issue_file::{self, RECORD_EXTENSION};
use crate::types::enums::IssueState;
use crate::types::issue::{Issue, IssueNumber};

/// A local record together with where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIssue {
    pub issue: Issue,
    pub path: PathBuf,
    pub state: IssueState,
}

/// Every record that loaded, plus every file that did not.
#[derive(Debug, Default)]
pub struct LoadResult {
    pub issues: Vec<LocalIssue>,
    pub errors: Vec<ParseError>,
}

impl LoadResult {
    /// Identifiers whose file failed to parse, taken from the file name.
    pub fn broken_numbers(&self) -> HashSet<IssueNumber> {
        self.errors
            .iter()
            .filter_map(|e| {
                let name = Path::new(&e.path).file_name()?.to_str()?;
                issue_file::number_from_file_name(name)
            })
            .collect()
    }

    pub fn get(&self, number: &IssueNumber) -> Option<&LocalIssue> {
        self.issues.iter().find(|item| &item.issue.number == number)
    }

    /// Records named by `numbers`, in load order. Every identifier must match
    /// a loaded record.
    pub fn select(&self, numbers: &[IssueNumber]) -> Result<Vec<&LocalIssue>> {
        let missing: Vec<String> = numbers
            .iter()
            .filter(|n| self.get(n).is_none())
            .map(IssueNumber::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::NotFound(format!(
                "no matching issues for arguments: {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(self
            .issues
            .iter()
            .filter(|item| numbers.contains(&item.issue.number))
            .collect())
    }
}

/// Whether a command-line target names a file rather than an identifier.
pub fn is_path_target(target: &str) -> bool {
    target.ends_with(RECORD_EXTENSION) || target.contains('/') || target.contains('\\')
}

#[derive(Debug, Clone)]
pub struct IssueStore {
    paths: Paths,
}

impl IssueStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load every local record, open directory first, each directory in file
    /// name order. A broken file is collected and the rest still load.
    pub fn list(&self) -> Result<LoadResult> {
        let mut result = LoadResult::default();
        for state in [IssueState::Open, IssueState::Closed] {
            let dir = self.paths.dir_for_state(state);
            let mut names = match read_dir_names(dir) {
                Ok(names) => names,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to read {}", dir.display()))
                }
            };
            names.sort();

            for name in names {
                if !issue_file::is_record_file_name(&name) {
                    continue;
                }
                let path = dir.join(&name);
                if !path.is_file() {
                    continue;
                }
                match issue_file::read_file(&path) {
                    Ok(issue) => result.issues.push(Self::local(issue, path, state)),
                    Err(err) => {
                        let rel = self.paths.relative(&path);
                        warn!("skipping {rel}: {err}");
                        result.errors.push(ParseError {
                            path: rel,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
        debug!(
            "loaded {} local issues ({} unreadable)",
            result.issues.len(),
            result.errors.len()
        );
        Ok(result)
    }

    /// The directory a local record lives in decides its state.
    fn local(mut issue: Issue, path: PathBuf, state: IssueState) -> LocalIssue {
        issue.state = state;
        issue.normalize();
        LocalIssue { issue, path, state }
    }

    /// Resolve an identifier (`12`, `#12`, `Tabc123`) or a record path
    /// (absolute or relative to the store root).
    pub fn find(&self, reference: &str) -> Result<LocalIssue> {
        let reference = reference.trim();
        let loaded = self.list()?;

        let number = IssueNumber::new(reference);
        if !number.is_empty() {
            if let Some(found) = loaded.get(&number) {
                return Ok(found.clone());
            }
        }

        for candidate in self.path_candidates(reference) {
            if let Some(found) = loaded.issues.iter().find(|item| item.path == candidate) {
                return Ok(found.clone());
            }
            if candidate.is_file() {
                let state = candidate
                    .parent()
                    .and_then(|dir| self.paths.state_for_dir(dir))
                    .ok_or_else(|| SyncError::NotFound(reference.to_string()))?;
                let issue = issue_file::read_file(&candidate).map_err(|err| SyncError::Parse {
                    path: candidate.clone(),
                    message: err.to_string(),
                })?;
                return Ok(Self::local(issue, candidate, state));
            }
        }

        Err(SyncError::NotFound(reference.to_string()).into())
    }

    /// Turn command-line targets into identifiers. Paths must name an existing
    /// record; bare identifiers are taken as given.
    pub fn resolve_targets(&self, targets: &[String]) -> Result<Vec<IssueNumber>> {
        let mut numbers = Vec::with_capacity(targets.len());
        for target in targets {
            let number = if is_path_target(target) {
                self.find(target)?.issue.number
            } else {
                IssueNumber::new(target)
            };
            if !number.is_empty() && !numbers.contains(&number) {
                numbers.push(number);
            }
        }
        Ok(numbers)
    }

    fn path_candidates(&self, reference: &str) -> Vec<PathBuf> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }
        let mut candidates = vec![self.paths.root.join(path)];
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(path));
        }
        candidates
    }

    /// Write a record at the location derived from its state, identifier and
    /// title. When `current` points elsewhere the file is renamed first.
    pub fn write(&self, current: Option<&Path>, issue: &Issue) -> Result<PathBuf> {
        let target = self.location_for(issue);
        if let Some(current) = current {
            if current != target && current.exists() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                debug!(
                    "renaming {} -> {}",
                    self.paths.relative(current),
                    self.paths.relative(&target)
                );
                fs::rename(current, &target).with_context(|| {
                    format!(
                        "Failed to rename {} -> {}",
                        current.display(),
                        target.display()
                    )
                })?;
            }
        }
        issue_file::write_file(&target, issue)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(target)
    }

    pub fn location_for(&self, issue: &Issue) -> PathBuf {
        issue_file::path_for(
            self.paths.dir_for_state(issue.state),
            &issue.number,
            &issue.title,
        )
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    // -----------------------------------------------------------------------
    // Original snapshots
    // -----------------------------------------------------------------------

    /// Last-known remote state of a record. A missing snapshot is `None`; an
    /// unreadable one is treated the same way with a warning.
    pub fn read_original(&self, number: &IssueNumber) -> Result<Option<Issue>> {
        let path = self.paths.original_path(number);
        match issue_file::read_file(&path) {
            Ok(issue) => Ok(Some(issue)),
            Err(issue_file::IssueFileError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                Ok(None)
            }
            Err(issue_file::IssueFileError::Io(err)) => {
                Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
            Err(err) => {
                warn!("ignoring unreadable snapshot {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    pub fn write_original(&self, issue: &Issue) -> Result<()> {
        let path = self.paths.original_path(&issue.number);
        issue_file::write_file(&path, issue)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))
    }

    pub fn remove_original(&self, number: &IssueNumber) -> Result<()> {
        self.remove(&self.paths.original_path(number))
    }

    /// Identifiers that have a snapshot, sorted.
    pub fn original_numbers(&self) -> Result<Vec<IssueNumber>> {
        let dir = &self.paths.originals_dir;
        let names = match read_dir_names(dir) {
            Ok(names) => names,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("Failed to read {}", dir.display())),
        };
        let mut numbers: Vec<IssueNumber> = names
            .iter()
            .filter_map(|name| name.strip_suffix(RECORD_EXTENSION))
            .filter(|stem| !stem.is_empty())
            .map(IssueNumber::new)
            .collect();
        numbers.sort();
        Ok(numbers)
    }

    /// Every identifier in use by a record file or a snapshot.
    pub fn used_numbers(&self) -> Result<HashSet<IssueNumber>> {
        let mut used: HashSet<IssueNumber> = self.original_numbers()?.into_iter().collect();
        for state in [IssueState::Open, IssueState::Closed] {
            if let Ok(names) = read_dir_names(self.paths.dir_for_state(state)) {
                used.extend(
                    names
                        .iter()
                        .filter_map(|name| issue_file::number_from_file_name(name)),
                );
            }
        }
        Ok(used)
    }
}

fn read_dir_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
