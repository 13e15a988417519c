use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote repository the store mirrors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
}

impl RepositoryConfig {
    /// Parse `owner/repo`.
    pub fn parse(slug: &str) -> Option<Self> {
        let (owner, repo) = slug.trim().split_once('/')?;
        let owner = owner.trim();
        let repo = repo.trim().trim_end_matches(".git");
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Bookkeeping written back by sync operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_pull: Option<DateTime<Utc>>,
}

/// Persisted store configuration (`.issues/.sync/config.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub sync: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_secs: Option<u64>,
}

impl SyncConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }
}
