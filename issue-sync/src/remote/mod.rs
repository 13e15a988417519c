//! Remote issue-tracking service.
//!
//! The reconcilers only ever talk to an [`IssueClient`]; the GitHub
//! implementation lives in [`github`], an in-memory one backs the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::enums::{IssueState, ListState, StateTransition};
use crate::types::issue::{Issue, IssueNumber};

pub mod github;
#[cfg(test)]
pub mod memory;

pub use github::GitHubClient;

/// Custom error type for remote service operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("GITHUB_TOKEN (or GH_TOKEN) environment variable is not set")]
    MissingToken,
    #[error("Authentication failed (401). Check GITHUB_TOKEN")]
    AuthFailed,
    #[error("Permission denied (403). The token may lack required scopes")]
    PermissionDenied,
    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },
    #[error("GraphQL error: {0}")]
    GraphQL(String),
    #[error("Issue {0} not found")]
    NotFound(String),
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTypeInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
}

/// Result of a list query: the issues plus the color of every label seen,
/// keyed by lowercase label name.
#[derive(Debug, Clone, Default)]
pub struct ListIssuesResult {
    pub issues: Vec<Issue>,
    pub label_colors: HashMap<String, String>,
}

/// Partial update of one issue. `None` and empty lists mean "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueChange {
    pub title: Option<String>,
    pub body: Option<String>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub add_assignees: Vec<String>,
    pub remove_assignees: Vec<String>,
    pub add_projects: Vec<String>,
    pub remove_projects: Vec<String>,
    /// `Some("")` clears the milestone
    pub milestone: Option<String>,
    /// `Some("")` clears the issue type
    pub issue_type: Option<String>,
    pub state_transition: Option<StateTransition>,
    /// `Some("")` clears the reason
    pub state_reason: Option<String>,
    /// `Some(None)` removes the parent
    pub parent: Option<Option<IssueNumber>>,
    pub add_blocked_by: Vec<IssueNumber>,
    pub remove_blocked_by: Vec<IssueNumber>,
    pub add_blocks: Vec<IssueNumber>,
    pub remove_blocks: Vec<IssueNumber>,
}

impl IssueChange {
    pub fn is_empty(&self) -> bool {
        *self == IssueChange::default()
    }

    /// Whether the change touches only title, body and state, which a batched
    /// update can carry. A reason is only carried together with a close.
    pub fn is_batchable(&self) -> bool {
        let simple = IssueChange {
            title: self.title.clone(),
            body: self.body.clone(),
            state_transition: self.state_transition,
            state_reason: self.state_reason.clone(),
            ..Default::default()
        };
        let reason_ok = self.state_reason.is_none()
            || self.state_transition == Some(StateTransition::Close);
        let has_field =
            self.title.is_some() || self.body.is_some() || self.state_transition.is_some();
        has_field && reason_ok && *self == simple
    }

    pub fn touches_relationships(&self) -> bool {
        self.parent.is_some()
            || !self.add_blocked_by.is_empty()
            || !self.remove_blocked_by.is_empty()
            || !self.add_blocks.is_empty()
            || !self.remove_blocks.is_empty()
    }
}

/// Outcome of a creation. The issue exists remotely as `number` even when
/// `follow_up` holds the error of a later step (state, projects, relationships).
#[derive(Debug)]
pub struct Created {
    pub number: IssueNumber,
    pub follow_up: Option<RemoteError>,
}

impl Created {
    pub fn complete(number: IssueNumber) -> Self {
        Self {
            number,
            follow_up: None,
        }
    }
}

/// The part of `issue` the creation call itself carries. State, projects and
/// relationships are applied by follow-up calls.
pub fn creation_fields(issue: &Issue) -> Issue {
    Issue {
        state: IssueState::Open,
        state_reason: None,
        projects: Vec::new(),
        parent: None,
        blocked_by: Vec::new(),
        blocks: Vec::new(),
        ..issue.clone()
    }
}

/// One entry of a batched update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate {
    pub number: IssueNumber,
    pub change: IssueChange,
}

/// Operations the sync engine needs from the remote service.
#[async_trait]
pub trait IssueClient: Send + Sync {
    /// One issue with its relationships.
    async fn get_issue(&self, number: &IssueNumber) -> Result<Issue, RemoteError>;

    /// Many issues in one logical call. Missing issues are absent from the
    /// result rather than an error.
    async fn get_issues_batch(
        &self,
        numbers: &[IssueNumber],
    ) -> Result<HashMap<IssueNumber, Issue>, RemoteError>;

    /// Every issue in the given lifecycle state, optionally filtered by label.
    async fn list_issues(
        &self,
        state: ListState,
        label: Option<&str>,
    ) -> Result<ListIssuesResult, RemoteError>;

    async fn list_labels(&self) -> Result<Vec<Label>, RemoteError>;

    async fn list_milestones(&self) -> Result<Vec<Milestone>, RemoteError>;

    async fn list_issue_types(&self) -> Result<Vec<IssueTypeInfo>, RemoteError>;

    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError>;

    async fn create_label(&self, name: &str, color: &str) -> Result<(), RemoteError>;

    /// Create an issue and return its canonical identifier. The number of the
    /// passed issue is ignored. `Err` means nothing was created.
    async fn create_issue(&self, issue: &Issue) -> Result<Created, RemoteError>;

    async fn update_issue(
        &self,
        number: &IssueNumber,
        change: &IssueChange,
    ) -> Result<(), RemoteError>;

    fn supports_batch_update(&self) -> bool {
        false
    }

    /// Apply several batchable updates in one call. All-or-nothing from the
    /// caller's point of view.
    async fn update_issues_batch(&self, updates: &[BatchUpdate]) -> Result<(), RemoteError> {
        let _ = updates;
        Err(RemoteError::Unsupported("batched updates"))
    }

    async fn add_comment(&self, number: &IssueNumber, body: &str) -> Result<(), RemoteError>;
}
