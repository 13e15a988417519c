//! In-memory [`IssueClient`] for reconciler tests. Records every call and can
//! be told to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    creation_fields, BatchUpdate, Created, IssueChange, IssueClient, IssueTypeInfo, Label,
    ListIssuesResult, Milestone, Project, RemoteError,
};
use crate::cancel::CancelToken;
use crate::types::enums::{IssueState, ListState, StateTransition};
use crate::types::issue::{Issue, IssueNumber};

const DEFAULT_LABEL_COLOR: &str = "ededed";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetIssue(IssueNumber),
    GetIssuesBatch(Vec<IssueNumber>),
    ListIssues(ListState, Option<String>),
    ListLabels,
    ListMilestones,
    ListIssueTypes,
    ListProjects,
    CreateLabel(String),
    CreateIssue(Issue),
    UpdateIssue(IssueNumber, IssueChange),
    UpdateIssuesBatch(Vec<IssueNumber>),
    AddComment(IssueNumber, String),
}

#[derive(Debug, Default)]
struct State {
    issues: BTreeMap<IssueNumber, Issue>,
    label_colors: HashMap<String, String>,
    milestones: Vec<Milestone>,
    issue_types: Vec<IssueTypeInfo>,
    projects: Vec<Project>,
    next_number: u64,
    calls: Vec<Call>,
    failing: HashSet<String>,
    failing_follow_up: HashSet<String>,
    cancel_after_update: Option<CancelToken>,
    fail_list: bool,
    fail_vocabulary: bool,
    fail_batch: bool,
    batch_support: bool,
    list_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        let client = Self::default();
        client.lock().next_number = 100;
        client
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        let client = Self::new();
        for issue in issues {
            client.put(issue);
        }
        client
    }

    /// Insert or replace a remote issue.
    pub fn put(&self, issue: Issue) {
        let issue = issue.normalized();
        self.lock().issues.insert(issue.number.clone(), issue);
    }

    pub fn remove(&self, number: &str) {
        self.lock().issues.remove(&IssueNumber::from(number));
    }

    pub fn issue(&self, number: &str) -> Option<Issue> {
        self.lock().issues.get(&IssueNumber::from(number)).cloned()
    }

    pub fn set_next_number(&self, next: u64) {
        self.lock().next_number = next;
    }

    pub fn set_label_color(&self, name: &str, color: &str) {
        self.lock()
            .label_colors
            .insert(name.to_lowercase(), color.to_string());
    }

    /// Make every call about this issue number (or creation of an issue with
    /// this title) fail.
    pub fn fail_on(&self, key: &str) {
        self.lock().failing.insert(key.to_string());
    }

    /// Create issues with this title but fail the calls that follow the
    /// creation, leaving only the fields the creation itself carries.
    pub fn fail_follow_up_on(&self, title: &str) {
        self.lock().failing_follow_up.insert(title.to_string());
    }

    /// Cancel `token` once the first single-issue update has been applied.
    pub fn cancel_after_update(&self, token: CancelToken) {
        self.lock().cancel_after_update = Some(token);
    }

    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    pub fn fail_vocabulary(&self) {
        self.lock().fail_vocabulary = true;
    }

    pub fn enable_batch(&self) {
        self.lock().batch_support = true;
    }

    pub fn fail_batch(&self) {
        self.lock().fail_batch = true;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.lock().list_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Calls that change remote state.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::CreateLabel(_)
                        | Call::CreateIssue(_)
                        | Call::UpdateIssue(..)
                        | Call::UpdateIssuesBatch(_)
                        | Call::AddComment(..)
                )
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    fn check(&self, key: &str) -> Result<(), RemoteError> {
        if self.lock().failing.contains(key) {
            return Err(RemoteError::HttpError {
                status: 500,
                message: format!("injected failure for {key}"),
            });
        }
        Ok(())
    }

    fn check_vocabulary(&self) -> Result<(), RemoteError> {
        if self.lock().fail_vocabulary {
            return Err(RemoteError::HttpError {
                status: 502,
                message: "injected vocabulary failure".to_string(),
            });
        }
        Ok(())
    }

    fn apply(issue: &mut Issue, change: &IssueChange) {
        if let Some(title) = &change.title {
            issue.title = title.clone();
        }
        if let Some(body) = &change.body {
            issue.body = body.clone();
        }
        apply_set(&mut issue.labels, &change.add_labels, &change.remove_labels);
        apply_set(
            &mut issue.assignees,
            &change.add_assignees,
            &change.remove_assignees,
        );
        apply_set(
            &mut issue.projects,
            &change.add_projects,
            &change.remove_projects,
        );
        if let Some(milestone) = &change.milestone {
            issue.milestone = milestone.clone();
        }
        if let Some(issue_type) = &change.issue_type {
            issue.issue_type = issue_type.clone();
        }
        match change.state_transition {
            Some(StateTransition::Close) => issue.state = IssueState::Closed,
            Some(StateTransition::Reopen) => issue.state = IssueState::Open,
            None => {}
        }
        if let Some(reason) = &change.state_reason {
            issue.state_reason = (!reason.is_empty()).then(|| reason.clone());
        }
        if let Some(parent) = &change.parent {
            issue.parent = parent.clone();
        }
        issue
            .blocked_by
            .retain(|r| !change.remove_blocked_by.contains(r));
        issue.blocked_by.extend(change.add_blocked_by.iter().cloned());
        issue.blocks.retain(|r| !change.remove_blocks.contains(r));
        issue.blocks.extend(change.add_blocks.iter().cloned());
        issue.normalize();
    }
}

fn apply_set(set: &mut Vec<String>, add: &[String], remove: &[String]) {
    set.retain(|item| !remove.contains(item));
    set.extend(add.iter().cloned());
}

#[async_trait]
impl IssueClient for MemoryClient {
    async fn get_issue(&self, number: &IssueNumber) -> Result<Issue, RemoteError> {
        self.record(Call::GetIssue(number.clone()));
        self.check(number.as_str())?;
        self.issue(number.as_str())
            .ok_or_else(|| RemoteError::NotFound(number.to_string()))
    }

    async fn get_issues_batch(
        &self,
        numbers: &[IssueNumber],
    ) -> Result<HashMap<IssueNumber, Issue>, RemoteError> {
        self.record(Call::GetIssuesBatch(numbers.to_vec()));
        let state = self.lock();
        Ok(numbers
            .iter()
            .filter_map(|n| state.issues.get(n).map(|i| (n.clone(), i.clone())))
            .collect())
    }

    async fn list_issues(
        &self,
        list_state: ListState,
        label: Option<&str>,
    ) -> Result<ListIssuesResult, RemoteError> {
        self.record(Call::ListIssues(list_state, label.map(str::to_string)));
        let delay = self.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.fail_list {
            return Err(RemoteError::HttpError {
                status: 503,
                message: "injected list failure".to_string(),
            });
        }
        let issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|i| list_state == ListState::All || i.state == IssueState::Open)
            .filter(|i| label.map_or(true, |l| i.labels.iter().any(|x| x == l)))
            .cloned()
            .collect();
        let label_colors = issues
            .iter()
            .flat_map(|i| i.labels.iter())
            .map(|l| {
                let key = l.to_lowercase();
                let color = state
                    .label_colors
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string());
                (key, color)
            })
            .collect();
        Ok(ListIssuesResult {
            issues,
            label_colors,
        })
    }

    async fn list_labels(&self) -> Result<Vec<Label>, RemoteError> {
        self.record(Call::ListLabels);
        self.check_vocabulary()?;
        Ok(self
            .lock()
            .label_colors
            .iter()
            .map(|(name, color)| Label {
                name: name.clone(),
                color: color.clone(),
            })
            .collect())
    }

    async fn list_milestones(&self) -> Result<Vec<Milestone>, RemoteError> {
        self.record(Call::ListMilestones);
        self.check_vocabulary()?;
        Ok(self.lock().milestones.clone())
    }

    async fn list_issue_types(&self) -> Result<Vec<IssueTypeInfo>, RemoteError> {
        self.record(Call::ListIssueTypes);
        self.check_vocabulary()?;
        Ok(self.lock().issue_types.clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError> {
        self.record(Call::ListProjects);
        self.check_vocabulary()?;
        Ok(self.lock().projects.clone())
    }

    async fn create_label(&self, name: &str, color: &str) -> Result<(), RemoteError> {
        self.record(Call::CreateLabel(name.to_string()));
        self.check(name)?;
        self.set_label_color(name, color);
        Ok(())
    }

    async fn create_issue(&self, issue: &Issue) -> Result<Created, RemoteError> {
        self.record(Call::CreateIssue(issue.clone()));
        self.check(&issue.title)?;
        let mut state = self.lock();
        let number = IssueNumber::from(state.next_number);
        state.next_number += 1;
        let partial = state.failing_follow_up.contains(&issue.title);
        let mut created = if partial {
            creation_fields(issue)
        } else {
            issue.clone()
        };
        created.number = number.clone();
        created.synced_at = None;
        created.normalize();
        state.issues.insert(number.clone(), created);
        if partial {
            return Ok(Created {
                number,
                follow_up: Some(RemoteError::GraphQL(format!(
                    "injected follow-up failure for {}",
                    issue.title
                ))),
            });
        }
        Ok(Created::complete(number))
    }

    async fn update_issue(
        &self,
        number: &IssueNumber,
        change: &IssueChange,
    ) -> Result<(), RemoteError> {
        self.record(Call::UpdateIssue(number.clone(), change.clone()));
        self.check(number.as_str())?;
        let mut state = self.lock();
        let issue = state
            .issues
            .get_mut(number)
            .ok_or_else(|| RemoteError::NotFound(number.to_string()))?;
        Self::apply(issue, change);
        if let Some(token) = state.cancel_after_update.take() {
            token.cancel();
        }
        Ok(())
    }

    fn supports_batch_update(&self) -> bool {
        self.lock().batch_support
    }

    async fn update_issues_batch(&self, updates: &[BatchUpdate]) -> Result<(), RemoteError> {
        self.record(Call::UpdateIssuesBatch(
            updates.iter().map(|u| u.number.clone()).collect(),
        ));
        {
            let state = self.lock();
            if state.fail_batch
                || updates
                    .iter()
                    .any(|u| state.failing.contains(u.number.as_str()))
            {
                return Err(RemoteError::GraphQL("injected batch failure".to_string()));
            }
        }
        let mut state = self.lock();
        for update in updates {
            if let Some(issue) = state.issues.get_mut(&update.number) {
                Self::apply(issue, &update.change);
            }
        }
        Ok(())
    }

    async fn add_comment(&self, number: &IssueNumber, body: &str) -> Result<(), RemoteError> {
        self.record(Call::AddComment(number.clone(), body.to_string()));
        self.check(&format!("comment:{number}"))?;
        Ok(())
    }
}
