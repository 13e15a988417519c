use std::env;
use std::path::{Path, PathBuf};

use crate::types::enums::IssueState;
use crate::types::issue::IssueNumber;

/// Name of the store directory inside a project.
pub const STORE_DIR_NAME: &str = ".issues";
/// Name of the bookkeeping directory inside the store root.
pub const SYNC_DIR_NAME: &str = ".sync";

/// Every location the sync engine reads or writes, derived from a store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub open_dir: PathBuf,
    pub closed_dir: PathBuf,
    pub sync_dir: PathBuf,
    pub originals_dir: PathBuf,
    pub config_path: PathBuf,
    pub labels_path: PathBuf,
    pub milestones_path: PathBuf,
    pub issue_types_path: PathBuf,
    pub projects_path: PathBuf,
}

impl Paths {
    /// Derive paths from the store root (the `.issues` directory itself).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let sync_dir = root.join(SYNC_DIR_NAME);
        Self {
            open_dir: root.join(IssueState::Open.dir_name()),
            closed_dir: root.join(IssueState::Closed.dir_name()),
            originals_dir: sync_dir.join("originals"),
            config_path: sync_dir.join("config.yaml"),
            labels_path: sync_dir.join("labels.json"),
            milestones_path: sync_dir.join("milestones.json"),
            issue_types_path: sync_dir.join("issuetypes.json"),
            projects_path: sync_dir.join("projects.json"),
            sync_dir,
            root,
        }
    }

    /// Directory holding local issues in the given state.
    pub fn dir_for_state(&self, state: IssueState) -> &Path {
        match state {
            IssueState::Open => &self.open_dir,
            IssueState::Closed => &self.closed_dir,
        }
    }

    /// Lifecycle state implied by a directory, if it is one of the store's.
    pub fn state_for_dir(&self, dir: &Path) -> Option<IssueState> {
        [IssueState::Open, IssueState::Closed]
            .into_iter()
            .find(|state| self.dir_for_state(*state) == dir)
    }

    pub fn original_path(&self, number: &IssueNumber) -> PathBuf {
        self.originals_dir.join(format!("{number}.md"))
    }

    /// Path relative to the store root, with forward slashes, for display.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Walk up from `start_dir` looking for `.issues/.sync/config.yaml`
pub fn find_store_root(start_dir: Option<&Path>) -> Option<PathBuf> {
    let start = match start_dir {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().ok()?,
    };

    let mut dir = start.as_path();

    loop {
        let candidate = dir.join(STORE_DIR_NAME);
        if candidate.join(SYNC_DIR_NAME).join("config.yaml").exists() {
            return Some(candidate);
        }

        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }

    None
}

/// Resolve the store root: an explicit override wins, then the nearest
/// initialized store above the current directory, then `./.issues`.
pub fn resolve_paths(root_override: Option<&Path>) -> Paths {
    if let Some(root) = root_override {
        return Paths::new(root);
    }
    if let Some(root) = find_store_root(None) {
        return Paths::new(root);
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Paths::new(cwd.join(STORE_DIR_NAME))
}
