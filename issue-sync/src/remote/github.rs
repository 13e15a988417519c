//! GitHub API client
//!
//! GraphQL for reads and batched updates, REST for everything that mutates a
//! single issue (create, update, labels, assignees, comments, sub-issues and
//! dependencies).
//!
//! Credentials are read from environment variables:
//! - `GITHUB_TOKEN` (fallback `GH_TOKEN`): API token
//! - `GITHUB_API_URL` (optional): REST base URL for GitHub Enterprise

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    BatchUpdate, Created, IssueChange, IssueClient, IssueTypeInfo, Label, ListIssuesResult,
    Milestone, Project, RemoteError,
};
use crate::types::config::RepositoryConfig;
use crate::types::enums::{IssueState, ListState, StateTransition};
use crate::types::issue::{Issue, IssueNumber};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_API_URL: &str = "https://api.github.com";
const BATCH_CHUNK_SIZE: usize = 50;
const PAGE_SIZE: usize = 100;
const USER_AGENT: &str = concat!("issue-sync/", env!("CARGO_PKG_VERSION"));

const ISSUE_FIELDS: &str = r#"
    fragment IssueFields on Issue {
        number
        title
        body
        state
        stateReason
        labels(first: 100) { nodes { name color } }
        assignees(first: 100) { nodes { login } }
        milestone { title }
        issueType { name }
        projectItems(first: 50) { nodes { project { title } } }
        parent { number }
        blockedBy(first: 50) { nodes { number } }
        blocking(first: 50) { nodes { number } }
    }
"#;

// ---------------------------------------------------------------------------
// GraphQL response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

impl<T> Nodes<T> {
    fn into_iter(self) -> impl Iterator<Item = T> {
        self.nodes.into_iter().flatten()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelNode {
    name: String,
    #[serde(default)]
    color: String,
}

#[derive(Debug, Deserialize)]
struct LoginNode {
    login: String,
}

#[derive(Debug, Deserialize)]
struct TitleNode {
    title: String,
}

#[derive(Debug, Deserialize)]
struct NameNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NumberNode {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct ProjectItemNode {
    project: Option<TitleNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    state: String,
    state_reason: Option<String>,
    labels: Option<Nodes<LabelNode>>,
    assignees: Option<Nodes<LoginNode>>,
    milestone: Option<TitleNode>,
    issue_type: Option<NameNode>,
    project_items: Option<Nodes<ProjectItemNode>>,
    parent: Option<NumberNode>,
    blocked_by: Option<Nodes<NumberNode>>,
    blocking: Option<Nodes<NumberNode>>,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SingleIssue {
    issue: Option<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuePage {
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<IssueNode>>,
}

#[derive(Debug, Deserialize)]
struct IssueList {
    issues: IssuePage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelPage {
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<LabelNode>>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    labels: Option<LabelPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueTypeList {
    issue_types: Option<Nodes<IssueTypeInfo>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectList {
    projects_v2: Option<Nodes<Project>>,
}

#[derive(Debug, Deserialize)]
struct NodeId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RestIssue {
    id: u64,
    number: u64,
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct RestMilestone {
    number: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due_on: Option<String>,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemWithIds {
    id: String,
    project: Option<Project>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueProjectItems {
    project_items: Option<Nodes<ProjectItemWithIds>>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn issue_from_node(node: IssueNode, label_colors: &mut HashMap<String, String>) -> Issue {
    let labels: Vec<String> = node
        .labels
        .map(|l| {
            l.into_iter()
                .map(|label| {
                    label_colors.insert(label.name.to_lowercase(), label.color);
                    label.name
                })
                .collect()
        })
        .unwrap_or_default();
    let state = if node.state.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    };
    let refs = |nodes: Option<Nodes<NumberNode>>| -> Vec<IssueNumber> {
        nodes
            .map(|n| n.into_iter().map(|n| IssueNumber::from(n.number)).collect())
            .unwrap_or_default()
    };

    Issue {
        number: IssueNumber::from(node.number),
        title: node.title,
        body: node.body.replace("\r\n", "\n"),
        labels,
        assignees: node
            .assignees
            .map(|a| a.into_iter().map(|u| u.login).collect())
            .unwrap_or_default(),
        milestone: node.milestone.map(|m| m.title).unwrap_or_default(),
        issue_type: node.issue_type.map(|t| t.name).unwrap_or_default(),
        projects: node
            .project_items
            .map(|p| {
                p.into_iter()
                    .filter_map(|item| item.project.map(|p| p.title))
                    .collect()
            })
            .unwrap_or_default(),
        state,
        state_reason: node.state_reason.map(|r| r.to_lowercase()),
        parent: node.parent.map(|p| IssueNumber::from(p.number)),
        blocked_by: refs(node.blocked_by),
        blocks: refs(node.blocking),
        synced_at: None,
    }
    .normalized()
}

/// GraphQL endpoint for a REST base URL (`.../api/v3` on Enterprise).
fn graphql_endpoint(api_url: &str) -> String {
    match api_url.strip_suffix("/api/v3") {
        Some(host) => format!("{host}/api/graphql"),
        None => format!("{api_url}/graphql"),
    }
}

/// Aliased query fetching many issues at once: `i0: issue(number: 12) {...}`.
fn batch_query(numbers: &[u64]) -> String {
    let mut query = String::from("query($owner: String!, $name: String!) {\n  repository(owner: $owner, name: $name) {\n");
    for (idx, number) in numbers.iter().enumerate() {
        query.push_str(&format!("    i{idx}: issue(number: {number}) {{ ...IssueFields }}\n"));
    }
    query.push_str("  }\n}\n");
    query.push_str(ISSUE_FIELDS);
    query
}

fn graphql_state_reason(reason: &str) -> Option<&'static str> {
    match reason {
        "completed" => Some("COMPLETED"),
        "not_planned" => Some("NOT_PLANNED"),
        "duplicate" => Some("DUPLICATE"),
        _ => None,
    }
}

/// Aliased mutation applying title/body/state changes to many issues.
///
/// Fails when an entry would contribute no mutation or carries a reason the
/// GraphQL schema cannot express.
fn batch_mutation(updates: &[(String, &IssueChange)]) -> Result<(String, Value), RemoteError> {
    let mut decls = Vec::new();
    let mut fields = Vec::new();
    let mut vars = serde_json::Map::new();

    for (idx, (node_id, change)) in updates.iter().enumerate() {
        let before = fields.len();
        if change.title.is_some() || change.body.is_some() {
            let mut input = serde_json::Map::new();
            input.insert("id".to_string(), json!(node_id));
            if let Some(title) = &change.title {
                input.insert("title".to_string(), json!(title));
            }
            if let Some(body) = &change.body {
                input.insert("body".to_string(), json!(body));
            }
            decls.push(format!("$u{idx}: UpdateIssueInput!"));
            fields.push(format!("u{idx}: updateIssue(input: $u{idx}) {{ issue {{ number }} }}"));
            vars.insert(format!("u{idx}"), Value::Object(input));
        }
        match change.state_transition {
            Some(StateTransition::Close) => {
                let mut input = serde_json::Map::new();
                input.insert("issueId".to_string(), json!(node_id));
                match change.state_reason.as_deref() {
                    None | Some("") => {}
                    Some(reason) => {
                        let reason = graphql_state_reason(reason).ok_or(RemoteError::Unsupported(
                            "state reason in a batched update",
                        ))?;
                        input.insert("stateReason".to_string(), json!(reason));
                    }
                }
                decls.push(format!("$c{idx}: CloseIssueInput!"));
                fields.push(format!("c{idx}: closeIssue(input: $c{idx}) {{ issue {{ number }} }}"));
                vars.insert(format!("c{idx}"), Value::Object(input));
            }
            Some(StateTransition::Reopen) => {
                if change.state_reason.is_some() {
                    return Err(RemoteError::Unsupported("state reason in a batched update"));
                }
                decls.push(format!("$r{idx}: ReopenIssueInput!"));
                fields.push(format!("r{idx}: reopenIssue(input: $r{idx}) {{ issue {{ number }} }}"));
                vars.insert(format!("r{idx}"), json!({ "issueId": node_id }));
            }
            None if change.state_reason.is_some() => {
                return Err(RemoteError::Unsupported("state reason in a batched update"));
            }
            None => {}
        }
        if fields.len() == before {
            return Err(RemoteError::Unsupported("empty change in a batched update"));
        }
    }

    let mutation = format!(
        "mutation({}) {{\n  {}\n}}",
        decls.join(", "),
        fields.join("\n  ")
    );
    Ok((mutation, Value::Object(vars)))
}

/// REST body for `PATCH /issues/{n}`; `None` when no scalar field changed.
fn rest_update_body(change: &IssueChange, milestone_number: Option<Option<u64>>) -> Option<Value> {
    let mut body = serde_json::Map::new();
    if let Some(title) = &change.title {
        body.insert("title".to_string(), json!(title));
    }
    if let Some(text) = &change.body {
        body.insert("body".to_string(), json!(text));
    }
    match change.state_transition {
        Some(StateTransition::Close) => {
            body.insert("state".to_string(), json!("closed"));
        }
        Some(StateTransition::Reopen) => {
            body.insert("state".to_string(), json!("open"));
        }
        None => {}
    }
    if let Some(reason) = change.state_reason.as_deref().filter(|r| !r.is_empty()) {
        body.insert("state_reason".to_string(), json!(reason));
    }
    if let Some(milestone) = milestone_number {
        body.insert("milestone".to_string(), json!(milestone));
    }
    if let Some(issue_type) = &change.issue_type {
        let value = if issue_type.is_empty() {
            Value::Null
        } else {
            json!(issue_type)
        };
        body.insert("type".to_string(), value);
    }
    (!body.is_empty()).then_some(Value::Object(body))
}

fn as_u64(number: &IssueNumber) -> Result<u64, RemoteError> {
    number
        .as_str()
        .parse()
        .map_err(|_| RemoteError::NotFound(number.to_string()))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GitHub API client scoped to one repository.
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    api_url: String,
    graphql_url: String,
    owner: String,
    repo: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("repository", &format!("{}/{}", self.owner, self.repo))
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl GitHubClient {
    /// Create a new client from environment variables.
    ///
    /// Reads `GITHUB_TOKEN` with fallback to `GH_TOKEN`, and `GITHUB_API_URL`.
    pub fn new(repository: &RepositoryConfig) -> Result<Self, RemoteError> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .map_err(|_| RemoteError::MissingToken)?;
        let api_url =
            std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::with_token(repository, token, &api_url)
    }

    pub fn with_token(
        repository: &RepositoryConfig,
        token: String,
        api_url: &str,
    ) -> Result<Self, RemoteError> {
        if token.trim().is_empty() {
            return Err(RemoteError::MissingToken);
        }
        let api_url = api_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            token,
            graphql_url: graphql_endpoint(&api_url),
            api_url,
            owner: repository.owner.clone(),
            repo: repository.repo.clone(),
        })
    }

    /// `owner/repo` this client talks to.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_vars(&self) -> Value {
        json!({ "owner": self.owner, "name": self.repo })
    }

    // -----------------------------------------------------------------------
    // Generic helpers
    // -----------------------------------------------------------------------

    async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body_text = resp.text().await.unwrap_or_default();
        warn!("GitHub API error: HTTP {} on {}: {}", status.as_u16(), what, body_text);
        match status {
            StatusCode::UNAUTHORIZED => Err(RemoteError::AuthFailed),
            StatusCode::FORBIDDEN => Err(RemoteError::PermissionDenied),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(what.to_string())),
            _ => Err(RemoteError::HttpError {
                status: status.as_u16(),
                message: body_text,
            }),
        }
    }

    async fn graphql_response<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<GraphQLResponse<T>, RemoteError> {
        let body = json!({
            "query": query,
            "variables": variables,
        });

        let resp = self
            .client
            .post(&self.graphql_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp, "graphql").await?;

        resp.json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse GitHub response: {e}").into())
    }

    /// Run a GraphQL operation; any error in the response fails the call.
    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, RemoteError> {
        let gql_resp: GraphQLResponse<T> = self.graphql_response(query, variables).await?;

        if let Some(errors) = gql_resp.errors {
            if !errors.is_empty() {
                let msg = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(RemoteError::GraphQL(msg));
            }
        }

        gql_resp
            .data
            .ok_or_else(|| RemoteError::GraphQL("No data in response".to_string()))
    }

    async fn rest<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, RemoteError> {
        let resp = self.rest_send(method, path, body).await?;
        resp.json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse GitHub response: {e}").into())
    }

    async fn rest_send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, path);
        debug!("{method} {url}");
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        Self::check_status(resp, path).await
    }

    async fn rest_issue(&self, number: u64) -> Result<RestIssue, RemoteError> {
        self.rest(Method::GET, &format!("issues/{number}"), None).await
    }

    async fn milestone_number(&self, title: &str) -> Result<Option<u64>, RemoteError> {
        if title.is_empty() {
            return Ok(None);
        }
        let milestones: Vec<RestMilestone> = self
            .rest(
                Method::GET,
                &format!("milestones?state=all&per_page={PAGE_SIZE}"),
                None,
            )
            .await?;
        milestones
            .into_iter()
            .find(|m| m.title.eq_ignore_ascii_case(title))
            .map(|m| Some(m.number))
            .ok_or_else(|| RemoteError::NotFound(format!("milestone '{title}'")))
    }

    async fn project_id(&self, title: &str) -> Result<String, RemoteError> {
        self.list_projects()
            .await?
            .into_iter()
            .find(|p| p.title.eq_ignore_ascii_case(title))
            .map(|p| p.id)
            .ok_or_else(|| RemoteError::NotFound(format!("project '{title}'")))
    }

    // -----------------------------------------------------------------------
    // Relationship and project edges
    // -----------------------------------------------------------------------

    async fn set_parent(&self, child: &RestIssue, parent: u64) -> Result<(), RemoteError> {
        self.rest_send(
            Method::POST,
            &format!("issues/{parent}/sub_issues"),
            Some(&json!({ "sub_issue_id": child.id, "replace_parent": true })),
        )
        .await?;
        Ok(())
    }

    async fn clear_parent(&self, child: &RestIssue) -> Result<(), RemoteError> {
        let current = self.get_issue(&IssueNumber::from(child.number)).await?;
        if let Some(parent) = current.parent {
            self.rest_send(
                Method::DELETE,
                &format!("issues/{}/sub_issue", as_u64(&parent)?),
                Some(&json!({ "sub_issue_id": child.id })),
            )
            .await?;
        }
        Ok(())
    }

    async fn add_blocked_by(&self, issue: u64, blocker: u64) -> Result<(), RemoteError> {
        let blocker = self.rest_issue(blocker).await?;
        self.rest_send(
            Method::POST,
            &format!("issues/{issue}/dependencies/blocked_by"),
            Some(&json!({ "issue_id": blocker.id })),
        )
        .await?;
        Ok(())
    }

    async fn remove_blocked_by(&self, issue: u64, blocker: u64) -> Result<(), RemoteError> {
        let blocker = self.rest_issue(blocker).await?;
        self.rest_send(
            Method::DELETE,
            &format!("issues/{issue}/dependencies/blocked_by/{}", blocker.id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn add_to_project(&self, content_id: &str, project_title: &str) -> Result<(), RemoteError> {
        let project_id = self.project_id(project_title).await?;
        let _: Value = self
            .graphql(
                r#"
                mutation($project: ID!, $content: ID!) {
                    addProjectV2ItemById(input: { projectId: $project, contentId: $content }) {
                        item { id }
                    }
                }
                "#,
                json!({ "project": project_id, "content": content_id }),
            )
            .await?;
        Ok(())
    }

    async fn remove_from_project(&self, number: u64, project_title: &str) -> Result<(), RemoteError> {
        let data: RepositoryData<SingleProjectItems> = self
            .graphql(
                r#"
                query($owner: String!, $name: String!, $number: Int!) {
                    repository(owner: $owner, name: $name) {
                        issue(number: $number) {
                            projectItems(first: 50) { nodes { id project { id title } } }
                        }
                    }
                }
                "#,
                json!({ "owner": self.owner, "name": self.repo, "number": number }),
            )
            .await?;
        let items = data
            .repository
            .and_then(|r| r.issue)
            .and_then(|i| i.project_items)
            .map(|n| n.into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        for item in items {
            let Some(project) = item.project else { continue };
            if !project.title.eq_ignore_ascii_case(project_title) {
                continue;
            }
            let _: Value = self
                .graphql(
                    r#"
                    mutation($project: ID!, $item: ID!) {
                        deleteProjectV2Item(input: { projectId: $project, itemId: $item }) {
                            deletedItemId
                        }
                    }
                    "#,
                    json!({ "project": project.id, "item": item.id }),
                )
                .await?;
        }
        Ok(())
    }

    /// State, project and relationship calls made after a creation.
    async fn create_follow_up(&self, created: &RestIssue, change: &IssueChange) -> Result<(), RemoteError> {
        if let Some(patch) = rest_update_body(change, None) {
            self.rest_send(Method::PATCH, &format!("issues/{}", created.number), Some(&patch))
                .await?;
        }
        self.apply_edges(created, change).await
    }

    /// Apply relationship, label, assignee and project parts of a change.
    async fn apply_edges(&self, issue: &RestIssue, change: &IssueChange) -> Result<(), RemoteError> {
        let number = issue.number;
        if !change.add_labels.is_empty() {
            self.rest_send(
                Method::POST,
                &format!("issues/{number}/labels"),
                Some(&json!({ "labels": change.add_labels })),
            )
            .await?;
        }
        for label in &change.remove_labels {
            let encoded: String = url_encode(label);
            match self
                .rest_send(Method::DELETE, &format!("issues/{number}/labels/{encoded}"), None)
                .await
            {
                Ok(_) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !change.add_assignees.is_empty() {
            self.rest_send(
                Method::POST,
                &format!("issues/{number}/assignees"),
                Some(&json!({ "assignees": change.add_assignees })),
            )
            .await?;
        }
        if !change.remove_assignees.is_empty() {
            self.rest_send(
                Method::DELETE,
                &format!("issues/{number}/assignees"),
                Some(&json!({ "assignees": change.remove_assignees })),
            )
            .await?;
        }
        for project in &change.add_projects {
            self.add_to_project(&issue.node_id, project).await?;
        }
        for project in &change.remove_projects {
            self.remove_from_project(number, project).await?;
        }

        match &change.parent {
            Some(Some(parent)) => self.set_parent(issue, as_u64(parent)?).await?,
            Some(None) => self.clear_parent(issue).await?,
            None => {}
        }
        for blocker in &change.add_blocked_by {
            self.add_blocked_by(number, as_u64(blocker)?).await?;
        }
        for blocker in &change.remove_blocked_by {
            self.remove_blocked_by(number, as_u64(blocker)?).await?;
        }
        for blocked in &change.add_blocks {
            self.add_blocked_by(as_u64(blocked)?, number).await?;
        }
        for blocked in &change.remove_blocks {
            self.remove_blocked_by(as_u64(blocked)?, number).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SingleProjectItems {
    issue: Option<IssueProjectItems>,
}

/// Percent-encode a path segment.
fn url_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl IssueClient for GitHubClient {
    async fn get_issue(&self, number: &IssueNumber) -> Result<Issue, RemoteError> {
        let query = format!(
            r#"
            query($owner: String!, $name: String!, $number: Int!) {{
                repository(owner: $owner, name: $name) {{
                    issue(number: $number) {{ ...IssueFields }}
                }}
            }}
            {ISSUE_FIELDS}"#
        );
        let mut vars = self.repo_vars();
        vars["number"] = json!(as_u64(number)?);

        let data: RepositoryData<SingleIssue> = self.graphql(&query, vars).await?;
        let node = data
            .repository
            .and_then(|r| r.issue)
            .ok_or_else(|| RemoteError::NotFound(number.to_string()))?;
        Ok(issue_from_node(node, &mut HashMap::new()))
    }

    async fn get_issues_batch(
        &self,
        numbers: &[IssueNumber],
    ) -> Result<HashMap<IssueNumber, Issue>, RemoteError> {
        let numeric: Vec<u64> = numbers
            .iter()
            .filter_map(|n| n.as_str().parse().ok())
            .collect();
        let mut issues = HashMap::new();
        let mut colors = HashMap::new();

        for chunk in numeric.chunks(BATCH_CHUNK_SIZE) {
            let resp: GraphQLResponse<RepositoryData<HashMap<String, Option<IssueNode>>>> =
                self.graphql_response(&batch_query(chunk), self.repo_vars()).await?;
            // Missing issues come back as null plus an error entry
            if let Some(errors) = &resp.errors {
                for e in errors {
                    debug!("batch fetch: {}", e.message);
                }
            }
            let Some(aliases) = resp.data.and_then(|d| d.repository) else {
                let msg = resp
                    .errors
                    .map(|e| e.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; "))
                    .unwrap_or_else(|| "No data in response".to_string());
                return Err(RemoteError::GraphQL(msg));
            };
            for node in aliases.into_values().flatten() {
                let issue = issue_from_node(node, &mut colors);
                issues.insert(issue.number.clone(), issue);
            }
        }
        Ok(issues)
    }

    async fn list_issues(
        &self,
        state: ListState,
        label: Option<&str>,
    ) -> Result<ListIssuesResult, RemoteError> {
        let query = format!(
            r#"
            query($owner: String!, $name: String!, $states: [IssueState!], $labels: [String!], $after: String) {{
                repository(owner: $owner, name: $name) {{
                    issues(first: {PAGE_SIZE}, after: $after, states: $states, labels: $labels,
                           orderBy: {{ field: CREATED_AT, direction: ASC }}) {{
                        pageInfo {{ hasNextPage endCursor }}
                        nodes {{ ...IssueFields }}
                    }}
                }}
            }}
            {ISSUE_FIELDS}"#
        );
        let states = match state {
            ListState::Open => json!(["OPEN"]),
            ListState::All => json!(["OPEN", "CLOSED"]),
        };

        let mut result = ListIssuesResult::default();
        let mut after: Option<String> = None;
        loop {
            let mut vars = self.repo_vars();
            vars["states"] = states.clone();
            vars["labels"] = label.map_or(Value::Null, |l| json!([l]));
            vars["after"] = json!(after);

            let data: RepositoryData<IssueList> = self.graphql(&query, vars).await?;
            let page = data
                .repository
                .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", self.owner, self.repo)))?
                .issues;
            for node in page.nodes.into_iter().flatten() {
                result
                    .issues
                    .push(issue_from_node(node, &mut result.label_colors));
            }
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }
        debug!("listed {} remote issues ({state})", result.issues.len());
        Ok(result)
    }

    async fn list_labels(&self) -> Result<Vec<Label>, RemoteError> {
        let query = format!(
            r#"
            query($owner: String!, $name: String!, $after: String) {{
                repository(owner: $owner, name: $name) {{
                    labels(first: {PAGE_SIZE}, after: $after) {{
                        pageInfo {{ hasNextPage endCursor }}
                        nodes {{ name color }}
                    }}
                }}
            }}"#
        );
        let mut labels = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut vars = self.repo_vars();
            vars["after"] = json!(after);
            let data: RepositoryData<LabelList> = self.graphql(&query, vars).await?;
            let Some(page) = data.repository.and_then(|r| r.labels) else {
                break;
            };
            labels.extend(page.nodes.into_iter().flatten().map(|l| Label {
                name: l.name,
                color: l.color,
            }));
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }
        Ok(labels)
    }

    async fn list_milestones(&self) -> Result<Vec<Milestone>, RemoteError> {
        let milestones: Vec<RestMilestone> = self
            .rest(
                Method::GET,
                &format!("milestones?state=all&per_page={PAGE_SIZE}"),
                None,
            )
            .await?;
        Ok(milestones
            .into_iter()
            .map(|m| Milestone {
                title: m.title,
                description: m.description.unwrap_or_default(),
                due_on: m.due_on,
                state: m.state,
            })
            .collect())
    }

    async fn list_issue_types(&self) -> Result<Vec<IssueTypeInfo>, RemoteError> {
        let data: RepositoryData<IssueTypeList> = self
            .graphql(
                r#"
                query($owner: String!, $name: String!) {
                    repository(owner: $owner, name: $name) {
                        issueTypes(first: 50) { nodes { id name description } }
                    }
                }
                "#,
                self.repo_vars(),
            )
            .await?;
        Ok(data
            .repository
            .and_then(|r| r.issue_types)
            .map(|n| n.into_iter().collect())
            .unwrap_or_default())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError> {
        let data: RepositoryData<ProjectList> = self
            .graphql(
                r#"
                query($owner: String!, $name: String!) {
                    repository(owner: $owner, name: $name) {
                        projectsV2(first: 50) { nodes { id title } }
                    }
                }
                "#,
                self.repo_vars(),
            )
            .await?;
        Ok(data
            .repository
            .and_then(|r| r.projects_v2)
            .map(|n| n.into_iter().collect())
            .unwrap_or_default())
    }

    async fn create_label(&self, name: &str, color: &str) -> Result<(), RemoteError> {
        self.rest_send(
            Method::POST,
            "labels",
            Some(&json!({ "name": name, "color": color })),
        )
        .await?;
        Ok(())
    }

    async fn create_issue(&self, issue: &Issue) -> Result<Created, RemoteError> {
        let mut body = serde_json::Map::new();
        body.insert("title".to_string(), json!(issue.title));
        body.insert("body".to_string(), json!(issue.body));
        if !issue.labels.is_empty() {
            body.insert("labels".to_string(), json!(issue.labels));
        }
        if !issue.assignees.is_empty() {
            body.insert("assignees".to_string(), json!(issue.assignees));
        }
        if let Some(milestone) = self.milestone_number(&issue.milestone).await? {
            body.insert("milestone".to_string(), json!(milestone));
        }
        if !issue.issue_type.is_empty() {
            body.insert("type".to_string(), json!(issue.issue_type));
        }

        let created: RestIssue = self
            .rest(Method::POST, "issues", Some(&Value::Object(body)))
            .await?;
        debug!("created issue #{}", created.number);

        // Everything after creation is an update of the new issue
        let follow_up = IssueChange {
            state_transition: (issue.state == IssueState::Closed).then_some(StateTransition::Close),
            state_reason: issue.state_reason.clone(),
            add_projects: issue.projects.clone(),
            parent: issue.parent.clone().map(Some),
            add_blocked_by: issue.blocked_by.clone(),
            add_blocks: issue.blocks.clone(),
            ..Default::default()
        };
        let number = IssueNumber::from(created.number);
        if let Err(e) = self.create_follow_up(&created, &follow_up).await {
            warn!("issue #{number} created but a follow-up call failed: {e}");
            return Ok(Created {
                number,
                follow_up: Some(e),
            });
        }
        Ok(Created::complete(number))
    }

    async fn update_issue(
        &self,
        number: &IssueNumber,
        change: &IssueChange,
    ) -> Result<(), RemoteError> {
        let n = as_u64(number)?;
        let milestone = match &change.milestone {
            Some(title) => Some(self.milestone_number(title).await?),
            None => None,
        };
        if let Some(patch) = rest_update_body(change, milestone) {
            self.rest_send(Method::PATCH, &format!("issues/{n}"), Some(&patch))
                .await?;
        }

        let has_edges = change.touches_relationships()
            || !change.add_labels.is_empty()
            || !change.remove_labels.is_empty()
            || !change.add_assignees.is_empty()
            || !change.remove_assignees.is_empty()
            || !change.add_projects.is_empty()
            || !change.remove_projects.is_empty();
        if has_edges {
            let issue = self.rest_issue(n).await?;
            self.apply_edges(&issue, change).await?;
        }
        Ok(())
    }

    fn supports_batch_update(&self) -> bool {
        true
    }

    async fn update_issues_batch(&self, updates: &[BatchUpdate]) -> Result<(), RemoteError> {
        for chunk in updates.chunks(BATCH_CHUNK_SIZE) {
            let numbers: Vec<u64> = chunk
                .iter()
                .map(|u| as_u64(&u.number))
                .collect::<Result<_, _>>()?;

            let mut id_query =
                String::from("query($owner: String!, $name: String!) {\n  repository(owner: $owner, name: $name) {\n");
            for (idx, n) in numbers.iter().enumerate() {
                id_query.push_str(&format!("    i{idx}: issue(number: {n}) {{ id }}\n"));
            }
            id_query.push_str("  }\n}\n");
            let ids: RepositoryData<HashMap<String, Option<NodeId>>> =
                self.graphql(&id_query, self.repo_vars()).await?;
            let mut ids = ids.repository.unwrap_or_default();

            let mut resolved = Vec::with_capacity(chunk.len());
            for (idx, update) in chunk.iter().enumerate() {
                let id = ids
                    .remove(&format!("i{idx}"))
                    .flatten()
                    .ok_or_else(|| RemoteError::NotFound(update.number.to_string()))?;
                resolved.push((id.id, &update.change));
            }

            let (mutation, vars) = batch_mutation(&resolved)?;
            let _: Value = self.graphql(&mutation, vars).await?;
            debug!("batched update of {} issues", chunk.len());
        }
        Ok(())
    }

    async fn add_comment(&self, number: &IssueNumber, body: &str) -> Result<(), RemoteError> {
        self.rest_send(
            Method::POST,
            &format!("issues/{}/comments", as_u64(number)?),
            Some(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryConfig {
        RepositoryConfig::parse("octo/widgets").unwrap()
    }

    // -- Client construction tests --

    #[test]
    fn test_client_requires_token() {
        let result = GitHubClient::with_token(&repo(), "  ".to_string(), DEFAULT_API_URL);
        assert!(matches!(result.unwrap_err(), RemoteError::MissingToken));
    }

    #[test]
    fn test_client_debug_redacts_token() {
        let client =
            GitHubClient::with_token(&repo(), "ghp_secret".to_string(), DEFAULT_API_URL).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("octo/widgets"));
    }

    #[test]
    fn test_graphql_endpoint() {
        assert_eq!(
            graphql_endpoint("https://api.github.com"),
            "https://api.github.com/graphql"
        );
        assert_eq!(
            graphql_endpoint("https://ghe.example.com/api/v3"),
            "https://ghe.example.com/api/graphql"
        );
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client =
            GitHubClient::with_token(&repo(), "t".to_string(), "https://ghe.example.com/api/v3/")
                .unwrap();
        assert_eq!(client.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(client.graphql_url, "https://ghe.example.com/api/graphql");
        assert_eq!(client.slug(), "octo/widgets");
    }

    // -- Response type parsing tests --

    #[test]
    fn test_parse_issue_response() {
        let json = json!({
            "data": {
                "repository": {
                    "issue": {
                        "number": 42,
                        "title": "Fix login",
                        "body": "Steps\r\nmore",
                        "state": "CLOSED",
                        "stateReason": "NOT_PLANNED",
                        "labels": { "nodes": [
                            { "name": "ui", "color": "c5def5" },
                            { "name": "Bug", "color": "d73a4a" }
                        ] },
                        "assignees": { "nodes": [ { "login": "octocat" } ] },
                        "milestone": { "title": "v1" },
                        "issueType": { "name": "Bug" },
                        "projectItems": { "nodes": [ { "project": { "title": "Roadmap" } }, { "project": null } ] },
                        "parent": { "number": 7 },
                        "blockedBy": { "nodes": [ { "number": 3 }, null ] },
                        "blocking": { "nodes": [] }
                    }
                }
            }
        });

        let resp: GraphQLResponse<RepositoryData<SingleIssue>> =
            serde_json::from_value(json).unwrap();
        let node = resp.data.unwrap().repository.unwrap().issue.unwrap();
        let mut colors = HashMap::new();
        let issue = issue_from_node(node, &mut colors);

        assert_eq!(issue.number.as_str(), "42");
        assert_eq!(issue.body, "Steps\nmore");
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.state_reason.as_deref(), Some("not_planned"));
        assert_eq!(issue.labels, vec!["Bug", "ui"]);
        assert_eq!(issue.assignees, vec!["octocat"]);
        assert_eq!(issue.milestone, "v1");
        assert_eq!(issue.issue_type, "Bug");
        assert_eq!(issue.projects, vec!["Roadmap"]);
        assert_eq!(issue.parent, Some(IssueNumber::from("7")));
        assert_eq!(issue.blocked_by, vec![IssueNumber::from("3")]);
        assert!(issue.blocks.is_empty());
        assert_eq!(colors["bug"], "d73a4a");
    }

    #[test]
    fn test_parse_open_issue_drops_reopened_reason() {
        let json = json!({
            "number": 1,
            "title": "t",
            "body": "",
            "state": "OPEN",
            "stateReason": "REOPENED",
            "labels": null,
            "assignees": null,
            "milestone": null,
            "issueType": null,
            "projectItems": null,
            "parent": null,
            "blockedBy": null,
            "blocking": null
        });
        let node: IssueNode = serde_json::from_value(json).unwrap();
        let issue = issue_from_node(node, &mut HashMap::new());
        assert_eq!(issue.state, IssueState::Open);
        assert_eq!(issue.state_reason, None);
    }

    #[test]
    fn test_parse_batch_response_with_missing_issue() {
        let json = json!({
            "data": {
                "repository": {
                    "i0": { "number": 5, "title": "five", "body": "", "state": "OPEN",
                            "stateReason": null, "labels": { "nodes": [] } },
                    "i1": null
                }
            },
            "errors": [ { "message": "Could not resolve to an Issue with the number of 6." } ]
        });
        let resp: GraphQLResponse<RepositoryData<HashMap<String, Option<IssueNode>>>> =
            serde_json::from_value(json).unwrap();
        assert_eq!(resp.errors.as_ref().unwrap().len(), 1);
        let aliases = resp.data.unwrap().repository.unwrap();
        let found: Vec<Issue> = aliases
            .into_values()
            .flatten()
            .map(|n| issue_from_node(n, &mut HashMap::new()))
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "five");
    }

    #[test]
    fn test_parse_issue_list_page() {
        let json = json!({
            "data": {
                "repository": {
                    "issues": {
                        "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29y" },
                        "nodes": [
                            { "number": 1, "title": "a", "body": "", "state": "OPEN", "stateReason": null }
                        ]
                    }
                }
            }
        });
        let resp: GraphQLResponse<RepositoryData<IssueList>> =
            serde_json::from_value(json).unwrap();
        let page = resp.data.unwrap().repository.unwrap().issues;
        assert!(page.page_info.has_next_page);
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("Y3Vyc29y"));
        assert_eq!(page.nodes.len(), 1);
    }

    #[test]
    fn test_parse_issue_types_and_projects() {
        let types: GraphQLResponse<RepositoryData<IssueTypeList>> = serde_json::from_value(json!({
            "data": { "repository": { "issueTypes": { "nodes": [
                { "id": "IT_1", "name": "Bug", "description": "Something broken" }
            ] } } }
        }))
        .unwrap();
        let types = types.data.unwrap().repository.unwrap().issue_types.unwrap();
        let types: Vec<IssueTypeInfo> = types.into_iter().collect();
        assert_eq!(types[0].name, "Bug");

        let projects: GraphQLResponse<RepositoryData<ProjectList>> =
            serde_json::from_value(json!({
                "data": { "repository": { "projectsV2": { "nodes": [ { "id": "PVT_1", "title": "Roadmap" } ] } } }
            }))
            .unwrap();
        let projects = projects.data.unwrap().repository.unwrap().projects_v2.unwrap();
        assert_eq!(projects.into_iter().next().unwrap().id, "PVT_1");
    }

    #[test]
    fn test_parse_rest_issue_and_milestones() {
        let created: RestIssue = serde_json::from_value(json!({
            "id": 1001, "number": 201, "node_id": "I_kw", "title": "ignored"
        }))
        .unwrap();
        assert_eq!(created.number, 201);
        assert_eq!(created.node_id, "I_kw");

        let milestones: Vec<RestMilestone> = serde_json::from_value(json!([
            { "number": 3, "title": "v1", "description": null, "due_on": null, "state": "open" }
        ]))
        .unwrap();
        assert_eq!(milestones[0].number, 3);
    }

    #[test]
    fn test_batch_query_aliases() {
        let query = batch_query(&[12, 15]);
        assert!(query.contains("i0: issue(number: 12) { ...IssueFields }"));
        assert!(query.contains("i1: issue(number: 15) { ...IssueFields }"));
        assert!(query.contains("fragment IssueFields on Issue"));
    }

    #[test]
    fn test_batch_mutation() {
        let title = IssueChange {
            title: Some("New".to_string()),
            ..Default::default()
        };
        let close = IssueChange {
            state_transition: Some(StateTransition::Close),
            state_reason: Some("not_planned".to_string()),
            ..Default::default()
        };
        let reopen = IssueChange {
            state_transition: Some(StateTransition::Reopen),
            ..Default::default()
        };
        let (mutation, vars) = batch_mutation(&[
            ("I_a".to_string(), &title),
            ("I_b".to_string(), &close),
            ("I_c".to_string(), &reopen),
        ])
        .unwrap();
        assert!(mutation.contains("$u0: UpdateIssueInput!"));
        assert!(mutation.contains("c1: closeIssue(input: $c1)"));
        assert!(mutation.contains("r2: reopenIssue(input: $r2)"));
        assert_eq!(vars["u0"]["title"], "New");
        assert_eq!(vars["c1"]["stateReason"], "NOT_PLANNED");
        assert_eq!(vars["r2"]["issueId"], "I_c");
    }

    #[test]
    fn test_batch_mutation_rejects_reason_only_change() {
        let title = IssueChange {
            title: Some("T".to_string()),
            ..Default::default()
        };
        let reason_only = IssueChange {
            state_reason: Some("not_planned".to_string()),
            ..Default::default()
        };
        let result = batch_mutation(&[("ID0".to_string(), &title), ("ID1".to_string(), &reason_only)]);
        assert!(matches!(result, Err(RemoteError::Unsupported(_))));

        let empty = IssueChange::default();
        assert!(batch_mutation(&[("ID0".to_string(), &empty)]).is_err());
    }

    #[test]
    fn test_rest_update_body() {
        let change = IssueChange {
            title: Some("t".to_string()),
            state_transition: Some(StateTransition::Close),
            state_reason: Some("completed".to_string()),
            issue_type: Some(String::new()),
            ..Default::default()
        };
        let body = rest_update_body(&change, Some(None)).unwrap();
        assert_eq!(body["title"], "t");
        assert_eq!(body["state"], "closed");
        assert_eq!(body["state_reason"], "completed");
        assert!(body["milestone"].is_null());
        assert!(body["type"].is_null());

        let labels_only = IssueChange {
            add_labels: vec!["bug".to_string()],
            ..Default::default()
        };
        assert!(rest_update_body(&labels_only, None).is_none());
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("good first issue"), "good%20first%20issue");
        assert_eq!(url_encode("a/b"), "a%2Fb");
        assert_eq!(url_encode("v1.0"), "v1.0");
    }

    #[test]
    fn test_error_display() {
        assert!(RemoteError::AuthFailed.to_string().contains("401"));
        assert!(RemoteError::PermissionDenied.to_string().contains("403"));
        assert_eq!(
            RemoteError::NotFound("12".to_string()).to_string(),
            "Issue 12 not found"
        );
    }
}
