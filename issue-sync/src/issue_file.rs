//! Record file format: YAML front matter followed by a Markdown body.
//!
//! ```text
//! ---
//! number: 12
//! title: Fix login
//! labels:
//! - bug
//! blocked_by:
//! - '#9'
//! ---
//! Body text
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::fs_util::atomic_write;
use crate::types::enums::IssueState;
use crate::types::issue::{Issue, IssueNumber};

const FRONT_MATTER_DELIMITER: &str = "---";
const MAX_SLUG_LEN: usize = 50;
pub const RECORD_EXTENSION: &str = ".md";
pub const COMMENT_EXTENSION: &str = ".comment.md";

#[derive(Debug, thiserror::Error)]
pub enum IssueFileError {
    #[error("missing front matter (file must start with `---`)")]
    MissingFrontMatter,
    #[error("unterminated front matter (no closing `---`)")]
    UnterminatedFrontMatter,
    #[error("invalid front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing issue number")]
    MissingNumber,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FrontMatter {
    #[serde(
        default,
        serialize_with = "serialize_number",
        skip_serializing_if = "Option::is_none"
    )]
    number: Option<IssueNumber>,
    #[serde(default)]
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<IssueState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    milestone: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    issue_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    projects: Vec<String>,
    #[serde(
        default,
        serialize_with = "serialize_optional_reference",
        skip_serializing_if = "Option::is_none"
    )]
    parent: Option<IssueNumber>,
    #[serde(
        default,
        serialize_with = "serialize_references",
        skip_serializing_if = "Vec::is_empty"
    )]
    blocked_by: Vec<IssueNumber>,
    #[serde(
        default,
        serialize_with = "serialize_references",
        skip_serializing_if = "Vec::is_empty"
    )]
    blocks: Vec<IssueNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synced_at: Option<DateTime<Utc>>,
}

/// Numeric identifiers are written as integers, temporary ones as strings.
fn serialize_number<S: Serializer>(
    number: &Option<IssueNumber>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match number {
        Some(n) => match n.as_str().parse::<u64>() {
            Ok(value) => serializer.serialize_u64(value),
            Err(_) => serializer.serialize_str(n.as_str()),
        },
        None => serializer.serialize_none(),
    }
}

fn serialize_optional_reference<S: Serializer>(
    reference: &Option<IssueNumber>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match reference {
        Some(r) => serializer.serialize_str(&r.to_reference()),
        None => serializer.serialize_none(),
    }
}

fn serialize_references<S: Serializer>(
    references: &[IssueNumber],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(references.iter().map(IssueNumber::to_reference))
}

impl From<&Issue> for FrontMatter {
    fn from(issue: &Issue) -> Self {
        FrontMatter {
            number: (!issue.number.is_empty()).then(|| issue.number.clone()),
            title: issue.title.clone(),
            state: Some(issue.state),
            state_reason: issue.state_reason.clone(),
            labels: issue.labels.clone(),
            assignees: issue.assignees.clone(),
            milestone: issue.milestone.clone(),
            issue_type: issue.issue_type.clone(),
            projects: issue.projects.clone(),
            parent: issue.parent.clone(),
            blocked_by: issue.blocked_by.clone(),
            blocks: issue.blocks.clone(),
            synced_at: issue.synced_at,
        }
    }
}

/// Split a document into its YAML header and body.
fn split_front_matter(content: &str) -> Result<(&str, &str), IssueFileError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix(FRONT_MATTER_DELIMITER)
        .and_then(|r| r.strip_prefix("\r\n").or_else(|| r.strip_prefix('\n')))
        .ok_or(IssueFileError::MissingFrontMatter)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FRONT_MATTER_DELIMITER {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((header, body));
        }
        offset += line.len();
    }
    Err(IssueFileError::UnterminatedFrontMatter)
}

/// Parse a record document. The result is normalized.
pub fn parse(content: &str) -> Result<Issue, IssueFileError> {
    let (header, body) = split_front_matter(content)?;
    let front: FrontMatter = if header.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str(header)?
    };

    let number = front.number.ok_or(IssueFileError::MissingNumber)?;
    if number.is_empty() {
        return Err(IssueFileError::MissingNumber);
    }

    let issue = Issue {
        number,
        title: front.title,
        body: body.replace("\r\n", "\n"),
        labels: front.labels,
        assignees: front.assignees,
        milestone: front.milestone,
        issue_type: front.issue_type,
        projects: front.projects,
        state: front.state.unwrap_or_default(),
        state_reason: front.state_reason,
        parent: front.parent,
        blocked_by: front.blocked_by,
        blocks: front.blocks,
        synced_at: front.synced_at,
    };
    Ok(issue.normalized())
}

/// Render a record document.
pub fn render(issue: &Issue) -> Result<String, IssueFileError> {
    let issue = issue.clone().normalized();
    let yaml = serde_yaml::to_string(&FrontMatter::from(&issue))?;

    let mut out = String::with_capacity(yaml.len() + issue.body.len() + 16);
    out.push_str(FRONT_MATTER_DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FRONT_MATTER_DELIMITER);
    out.push('\n');
    if !issue.body.is_empty() {
        out.push_str(&issue.body);
        out.push('\n');
    }
    Ok(out)
}

pub fn read_file(path: &Path) -> Result<Issue, IssueFileError> {
    let content = fs::read_to_string(path)?;
    parse(&content)
}

pub fn write_file(path: &Path, issue: &Issue) -> anyhow::Result<()> {
    let content = render(issue)?;
    atomic_write(path, content.as_bytes())
}

/// Filename-safe slug of a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// File name for a record: `<id>-<slug>.md`, or `<id>.md` without a slug.
pub fn file_name_for(number: &IssueNumber, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{number}{RECORD_EXTENSION}")
    } else {
        format!("{number}-{slug}{RECORD_EXTENSION}")
    }
}

/// Location of a record inside a state directory.
pub fn path_for(dir: &Path, number: &IssueNumber, title: &str) -> PathBuf {
    dir.join(file_name_for(number, title))
}

pub fn is_record_file_name(name: &str) -> bool {
    name.ends_with(RECORD_EXTENSION) && !name.ends_with(COMMENT_EXTENSION)
}

/// Identifier encoded in a record file name (`12-title.md` → `12`).
pub fn number_from_file_name(name: &str) -> Option<IssueNumber> {
    if !is_record_file_name(name) {
        return None;
    }
    let stem = name.strip_suffix(RECORD_EXTENSION)?;
    let id = stem.split('-').next().unwrap_or(stem);
    let number = IssueNumber::new(id);
    let numeric = !id.is_empty() && id.chars().all(|c| c.is_ascii_digit());
    (numeric || number.is_local()).then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_issue() -> Issue {
        Issue {
            number: IssueNumber::from("12"),
            title: "Fix login".to_string(),
            body: "Steps to reproduce\n\nsee #9".to_string(),
            labels: vec!["ui".to_string(), "bug".to_string()],
            assignees: vec!["octocat".to_string()],
            milestone: "v1".to_string(),
            issue_type: "Bug".to_string(),
            projects: vec!["Roadmap".to_string()],
            state: IssueState::Closed,
            state_reason: Some("completed".to_string()),
            parent: Some(IssueNumber::from("3")),
            blocked_by: vec![IssueNumber::from("9"), IssueNumber::from("Tabc123")],
            blocks: vec![IssueNumber::from("15")],
            synced_at: Some(
                DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
        }
    }

    #[test]
    fn test_render_then_parse_keeps_every_field() {
        let issue = full_issue();
        let text = render(&issue).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, issue.normalized());
    }

    #[test]
    fn test_render_writes_references_with_hash() {
        let text = render(&full_issue()).unwrap();
        assert!(text.starts_with("---\nnumber: 12\n"));
        assert!(text.contains("parent: '#3'"));
        assert!(text.contains("- '#Tabc123'"));
        assert!(text.contains("type: Bug"));
        assert!(text.ends_with("see #9\n"));
    }

    #[test]
    fn test_render_omits_empty_fields() {
        let issue = Issue {
            number: IssueNumber::from("Tx1"),
            title: "New".to_string(),
            ..Default::default()
        };
        let text = render(&issue).unwrap();
        assert_eq!(text, "---\nnumber: Tx1\ntitle: New\nstate: open\n---\n");
    }

    #[test]
    fn test_parse_accepts_plain_and_integer_references() {
        let text = "---\nnumber: '7'\ntitle: t\nparent: 3\nblocks:\n- 4\n- '#5'\n---\nbody\n";
        let issue = parse(text).unwrap();
        assert_eq!(issue.number.as_str(), "7");
        assert_eq!(issue.parent, Some(IssueNumber::from("3")));
        assert_eq!(issue.blocks, vec![IssueNumber::from("4"), IssueNumber::from("5")]);
        assert_eq!(issue.body, "body");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("no header"),
            Err(IssueFileError::MissingFrontMatter)
        ));
        assert!(matches!(
            parse("---\ntitle: x\n"),
            Err(IssueFileError::UnterminatedFrontMatter)
        ));
        assert!(matches!(
            parse("---\ntitle: x\n---\n"),
            Err(IssueFileError::MissingNumber)
        ));
        assert!(matches!(
            parse("---\nnumber: [1\n---\n"),
            Err(IssueFileError::Yaml(_))
        ));
    }

    #[test]
    fn test_parse_crlf() {
        let issue = parse("---\r\nnumber: 1\r\ntitle: a\r\n---\r\nline1\r\nline2\r\n").unwrap();
        assert_eq!(issue.title, "a");
        assert_eq!(issue.body, "line1\nline2");
    }

    #[test]
    fn test_body_may_contain_delimiter() {
        let issue = Issue {
            number: IssueNumber::from("1"),
            title: "t".to_string(),
            body: "above\n---\nbelow".to_string(),
            ..Default::default()
        };
        let parsed = parse(&render(&issue).unwrap()).unwrap();
        assert_eq!(parsed.body, "above\n---\nbelow");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix the Login Bug!"), "fix-the-login-bug");
        assert_eq!(slugify("  --Weird__chars  "), "weird-chars");
        assert_eq!(slugify("日本語"), "");
        let long = "a".repeat(80);
        assert_eq!(slugify(&long).len(), 50);
        let dashy = format!("{} b", "a".repeat(49));
        assert_eq!(slugify(&dashy), "a".repeat(49));
    }

    #[test]
    fn test_path_for() {
        let dir = Path::new("/s/open");
        assert_eq!(
            path_for(dir, &IssueNumber::from("12"), "Fix login"),
            PathBuf::from("/s/open/12-fix-login.md")
        );
        assert_eq!(
            path_for(dir, &IssueNumber::from("Tab1"), "???"),
            PathBuf::from("/s/open/Tab1.md")
        );
    }

    #[test]
    fn test_number_from_file_name() {
        assert_eq!(
            number_from_file_name("12-fix-login.md"),
            Some(IssueNumber::from("12"))
        );
        assert_eq!(number_from_file_name("Tab1.md"), Some(IssueNumber::from("Tab1")));
        assert_eq!(number_from_file_name("12.comment.md"), None);
        assert_eq!(number_from_file_name("notes.md"), None);
        assert_eq!(number_from_file_name("12.txt"), None);
    }

    #[test]
    fn test_write_and_read_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("open").join("12-fix-login.md");
        write_file(&path, &full_issue()).unwrap();
        assert_eq!(read_file(&path).unwrap(), full_issue().normalized());
    }
}
