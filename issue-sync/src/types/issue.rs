use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::IssueState;

/// Prefix marking a temporary identifier assigned to an issue created offline.
pub const LOCAL_ID_PREFIX: char = 'T';

/// Issue identifier: either the number assigned by the remote service or a
/// temporary local identifier (`T` followed by alphanumerics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueNumber(String);

impl IssueNumber {
    /// Build an identifier from user or remote input, dropping a leading `#`.
    pub fn new(value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        IssueNumber(value.strip_prefix('#').unwrap_or(value).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for temporary identifiers that have never been pushed.
    pub fn is_local(&self) -> bool {
        let mut chars = self.0.chars();
        chars.next() == Some(LOCAL_ID_PREFIX)
            && self.0.len() > 1
            && chars.all(|c| c.is_ascii_alphanumeric())
    }

    /// Inline reference form, e.g. `#42`.
    pub fn to_reference(&self) -> String {
        format!("#{}", self.0)
    }
}

impl fmt::Display for IssueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueNumber {
    fn from(value: &str) -> Self {
        IssueNumber::new(value)
    }
}

impl From<u64> for IssueNumber {
    fn from(value: u64) -> Self {
        IssueNumber(value.to_string())
    }
}

impl Serialize for IssueNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Accepts `42`, `"42"`, `"#42"` and `"Tabc123"`.
impl<'de> Deserialize<'de> for IssueNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString {
            Num(u64),
            Str(String),
        }

        Ok(match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Num(n) => IssueNumber::from(n),
            NumberOrString::Str(s) => IssueNumber::new(s),
        })
    }
}

/// One issue as mirrored on disk and on the remote service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Issue {
    pub number: IssueNumber,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: String,
    pub issue_type: String,
    pub projects: Vec<String>,
    pub state: IssueState,
    pub state_reason: Option<String>,
    pub parent: Option<IssueNumber>,
    pub blocked_by: Vec<IssueNumber>,
    pub blocks: Vec<IssueNumber>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Bring an issue into canonical form: sorted, de-duplicated collections,
    /// no trailing whitespace in the body, no state reason unless closed.
    pub fn normalize(&mut self) {
        for set in [&mut self.labels, &mut self.assignees, &mut self.projects] {
            set.retain(|item| !item.trim().is_empty());
            set.sort();
            set.dedup();
        }
        self.title = self.title.trim().to_string();
        self.body = self.body.trim_end().to_string();
        self.milestone = self.milestone.trim().to_string();
        self.issue_type = self.issue_type.trim().to_string();
        if self.state != IssueState::Closed {
            self.state_reason = None;
        }
        if matches!(self.state_reason.as_deref(), Some(r) if r.trim().is_empty()) {
            self.state_reason = None;
        }
        if matches!(&self.parent, Some(p) if p.is_empty()) {
            self.parent = None;
        }
        self.blocked_by.retain(|r| !r.is_empty());
        self.blocks.retain(|r| !r.is_empty());
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Content equality used by every three-way comparison. `synced_at` never
    /// participates; label, assignee and project sets compare order-insensitively
    /// while relationship sequences compare in order.
    pub fn same_content(&self, other: &Issue) -> bool {
        self.number == other.number
            && self.title == other.title
            && self.body == other.body
            && same_set(&self.labels, &other.labels)
            && same_set(&self.assignees, &other.assignees)
            && same_set(&self.projects, &other.projects)
            && self.milestone == other.milestone
            && self.issue_type == other.issue_type
            && self.state == other.state
            && self.state_reason.as_deref().unwrap_or("")
                == other.state_reason.as_deref().unwrap_or("")
            && self.parent == other.parent
            && self.blocked_by == other.blocked_by
            && self.blocks == other.blocks
    }

    /// Every identifier this issue points at through a structured field.
    pub fn references(&self) -> impl Iterator<Item = &IssueNumber> {
        self.parent
            .iter()
            .chain(self.blocked_by.iter())
            .chain(self.blocks.iter())
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}
