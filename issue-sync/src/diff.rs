//! Diff Engine: line diff, set diff, and the structural diff between two
//! versions of an issue.

use std::collections::BTreeSet;

use crate::remote::IssueChange;
use crate::types::enums::{IssueState, StateTransition};
use crate::types::issue::{Issue, IssueNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOp<'a> {
    pub tag: DiffTag,
    pub text: &'a str,
}

/// Split text into lines. A single trailing newline is insignificant and
/// empty text has no lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

/// Minimal line edit script from `old` to `new`.
pub fn line_diff<'a>(old: &'a str, new: &'a str) -> Vec<DiffOp<'a>> {
    diff_lines(&split_lines(old), &split_lines(new))
}

/// Longest-common-subsequence diff over exact line equality. When several
/// minimal scripts exist the backtrack takes the insertion first, so after
/// reversal a changed block lists its deletions before its insertions.
pub fn diff_lines<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffOp<'a>> {
    let (m, n) = (old.len(), new.len());
    let mut lcs = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            lcs[i][j] = if old[i - 1] == new[j - 1] {
                lcs[i - 1][j - 1] + 1
            } else {
                lcs[i - 1][j].max(lcs[i][j - 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(DiffOp {
                tag: DiffTag::Equal,
                text: old[i - 1],
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || lcs[i][j - 1] >= lcs[i - 1][j]) {
            ops.push(DiffOp {
                tag: DiffTag::Insert,
                text: new[j - 1],
            });
            j -= 1;
        } else {
            ops.push(DiffOp {
                tag: DiffTag::Delete,
                text: old[i - 1],
            });
            i -= 1;
        }
    }
    ops.reverse();
    ops
}

/// Number of inserted and deleted lines between two texts.
pub fn line_stats(old: &str, new: &str) -> (usize, usize) {
    line_diff(old, new)
        .iter()
        .fold((0, 0), |(ins, del), op| match op.tag {
            DiffTag::Insert => (ins + 1, del),
            DiffTag::Delete => (ins, del + 1),
            DiffTag::Equal => (ins, del),
        })
}

/// `(added, removed)` between two unordered collections, each sorted and
/// free of duplicates.
pub fn diff_string_set<S: AsRef<str>>(old: &[S], new: &[S]) -> (Vec<String>, Vec<String>) {
    let old: BTreeSet<&str> = old.iter().map(AsRef::as_ref).collect();
    let new: BTreeSet<&str> = new.iter().map(AsRef::as_ref).collect();
    let added = new.difference(&old).map(|s| s.to_string()).collect();
    let removed = old.difference(&new).map(|s| s.to_string()).collect();
    (added, removed)
}

/// Set diff over references. Temporary identifiers are dropped from both
/// sides: they cannot be sent to the remote service.
fn diff_refs(old: &[IssueNumber], new: &[IssueNumber]) -> (Vec<IssueNumber>, Vec<IssueNumber>) {
    let canonical = |refs: &[IssueNumber]| -> Vec<String> {
        refs.iter()
            .filter(|r| !r.is_local())
            .map(|r| r.as_str().to_string())
            .collect()
    };
    let (added, removed) = diff_string_set(&canonical(old), &canonical(new));
    (
        added.into_iter().map(IssueNumber::new).collect(),
        removed.into_iter().map(IssueNumber::new).collect(),
    )
}

/// Change-set that turns `original` (the last synced snapshot) into `local`.
pub fn compute_change(original: &Issue, local: &Issue) -> IssueChange {
    let mut change = IssueChange::default();
    if original.title != local.title {
        change.title = Some(local.title.clone());
    }
    if original.body != local.body {
        change.body = Some(local.body.clone());
    }
    (change.add_labels, change.remove_labels) = diff_string_set(&original.labels, &local.labels);
    (change.add_assignees, change.remove_assignees) =
        diff_string_set(&original.assignees, &local.assignees);
    (change.add_projects, change.remove_projects) =
        diff_string_set(&original.projects, &local.projects);
    if original.milestone != local.milestone {
        change.milestone = Some(local.milestone.clone());
    }
    if original.issue_type != local.issue_type {
        change.issue_type = Some(local.issue_type.clone());
    }
    change.state_transition = StateTransition::between(original.state, local.state);

    let old_reason = original.state_reason.as_deref().unwrap_or("");
    let new_reason = local.state_reason.as_deref().unwrap_or("");
    if old_reason != new_reason {
        change.state_reason = Some(new_reason.to_string());
    }

    if original.parent != local.parent {
        match &local.parent {
            Some(parent) if parent.is_local() => {}
            parent => change.parent = Some(parent.clone()),
        }
    }
    (change.add_blocked_by, change.remove_blocked_by) =
        diff_refs(&original.blocked_by, &local.blocked_by);
    (change.add_blocks, change.remove_blocks) = diff_refs(&original.blocks, &local.blocks);
    change
}

/// Whether `local` differs from `original` only in the order of its
/// blocked-by or blocks sequences. The remote service keeps no such order.
pub fn only_relationship_order_changed(original: &Issue, local: &Issue) -> bool {
    if original.same_content(local) {
        return false;
    }
    let sorted = |issue: &Issue| {
        let mut issue = issue.clone();
        issue.blocked_by.sort();
        issue.blocks.sort();
        issue
    };
    sorted(original).same_content(&sorted(local))
}

/// One human-readable field difference between two versions of an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Scalar {
        field: &'static str,
        old: String,
        new: String,
    },
    Set {
        field: &'static str,
        added: Vec<String>,
        removed: Vec<String>,
    },
    Body {
        inserted: usize,
        deleted: usize,
    },
}

fn state_label(state: IssueState, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if state == IssueState::Closed && !reason.is_empty() => {
            format!("{state} ({reason})")
        }
        _ => state.to_string(),
    }
}

fn ref_label(r: &Option<IssueNumber>) -> String {
    r.as_ref().map(IssueNumber::to_reference).unwrap_or_default()
}

fn ref_strings(refs: &[IssueNumber]) -> Vec<String> {
    refs.iter().map(IssueNumber::to_reference).collect()
}

/// Field-by-field summary of what changed from `old` to `new`, in display
/// order. `synced_at` never shows up.
pub fn summarize_changes(old: &Issue, new: &Issue) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut scalar = |field: &'static str, old: String, new: String| {
        if old != new {
            changes.push(FieldChange::Scalar { field, old, new });
        }
    };
    scalar("title", old.title.clone(), new.title.clone());
    scalar(
        "state",
        state_label(old.state, old.state_reason.as_deref()),
        state_label(new.state, new.state_reason.as_deref()),
    );
    scalar("milestone", old.milestone.clone(), new.milestone.clone());
    scalar("type", old.issue_type.clone(), new.issue_type.clone());
    scalar("parent", ref_label(&old.parent), ref_label(&new.parent));

    let mut set = |field: &'static str, old: Vec<String>, new: Vec<String>| {
        let (added, removed) = diff_string_set(&old, &new);
        if !added.is_empty() || !removed.is_empty() {
            changes.push(FieldChange::Set {
                field,
                added,
                removed,
            });
        }
    };
    set("labels", old.labels.clone(), new.labels.clone());
    set("assignees", old.assignees.clone(), new.assignees.clone());
    set("projects", old.projects.clone(), new.projects.clone());

    for (field, o, n) in [
        ("blocked_by", &old.blocked_by, &new.blocked_by),
        ("blocks", &old.blocks, &new.blocks),
    ] {
        let (added, removed) = diff_string_set(&ref_strings(o), &ref_strings(n));
        if !added.is_empty() || !removed.is_empty() {
            changes.push(FieldChange::Set {
                field,
                added,
                removed,
            });
        } else if o != n {
            // same members, different order
            changes.push(FieldChange::Scalar {
                field,
                old: ref_strings(o).join(", "),
                new: ref_strings(n).join(", "),
            });
        }
    }

    if old.body != new.body {
        let (inserted, deleted) = line_stats(&old.body, &new.body);
        changes.push(FieldChange::Body { inserted, deleted });
    }
    changes
}
