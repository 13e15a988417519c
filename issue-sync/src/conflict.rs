//! Conflict Detector: three-way classification of original snapshot, local
//! record and remote record.

use std::fmt;

use crate::types::issue::Issue;

/// Why a record could not be pulled cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictKind {
    /// Local and remote both moved away from the snapshot
    Diverged,
    /// A local record exists with no snapshot and differs from the remote
    NoBaseline,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Diverged => write!(f, "diverged"),
            ConflictKind::NoBaseline => write!(f, "no-baseline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Remote record never seen locally
    Added,
    /// Snapshot exists but the local file was deleted
    Restored,
    Unchanged,
    RemoteUpdate,
    LocalUpdate,
    Conflict(ConflictKind),
    /// Nothing fetched for this record in this pass
    NotFetched,
}

/// What to do when local and remote both changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Leave the local file alone and report the conflict
    #[default]
    Skip,
    /// Destructive: overwrite the local record with the remote one
    DiscardLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write the remote record locally and refresh the snapshot
    Write,
    /// Leave the local record as it is
    Keep,
    /// Leave the local record and report a conflict
    Skip(ConflictKind),
}

/// Classify one identifier. Equality ignores `synced_at` only.
pub fn classify(original: Option<&Issue>, local: Option<&Issue>, remote: Option<&Issue>) -> Verdict {
    let Some(remote) = remote else {
        return Verdict::NotFetched;
    };
    let Some(local) = local else {
        return match original {
            None => Verdict::Added,
            Some(_) => Verdict::Restored,
        };
    };
    let Some(original) = original else {
        return if local.same_content(remote) {
            Verdict::Unchanged
        } else {
            Verdict::Conflict(ConflictKind::NoBaseline)
        };
    };

    let local_changed = !local.same_content(original);
    let remote_changed = !remote.same_content(original);
    match (local_changed, remote_changed) {
        (false, false) => Verdict::Unchanged,
        (false, true) => Verdict::RemoteUpdate,
        (true, false) => Verdict::LocalUpdate,
        (true, true) => Verdict::Conflict(ConflictKind::Diverged),
    }
}

impl Verdict {
    pub fn action(self, policy: ConflictPolicy) -> Action {
        match self {
            Verdict::Added | Verdict::Restored | Verdict::RemoteUpdate => Action::Write,
            Verdict::Unchanged | Verdict::LocalUpdate | Verdict::NotFetched => Action::Keep,
            Verdict::Conflict(kind) => match policy {
                ConflictPolicy::Skip => Action::Skip(kind),
                ConflictPolicy::DiscardLocal => Action::Write,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::enums::IssueState;
    use crate::types::issue::IssueNumber;
    use chrono::Utc;

    fn bug(body: &str) -> Issue {
        Issue {
            number: IssueNumber::from("1"),
            title: "Bug".to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_added_and_restored() {
        let remote = bug("A");
        assert_eq!(classify(None, None, Some(&remote)), Verdict::Added);
        assert_eq!(classify(Some(&remote), None, Some(&remote)), Verdict::Restored);
    }

    #[test]
    fn test_not_fetched() {
        let local = bug("A");
        assert_eq!(classify(Some(&local), Some(&local), None), Verdict::NotFetched);
    }

    #[test]
    fn test_no_baseline() {
        let local = bug("A");
        assert_eq!(
            classify(None, Some(&local), Some(&bug("B"))),
            Verdict::Conflict(ConflictKind::NoBaseline)
        );
        assert_eq!(classify(None, Some(&local), Some(&bug("A"))), Verdict::Unchanged);
    }

    #[test]
    fn test_three_way_cases() {
        let original = bug("A");
        assert_eq!(
            classify(Some(&original), Some(&bug("A")), Some(&bug("A"))),
            Verdict::Unchanged
        );
        assert_eq!(
            classify(Some(&original), Some(&bug("A")), Some(&bug("A-remote"))),
            Verdict::RemoteUpdate
        );
        assert_eq!(
            classify(Some(&original), Some(&bug("A-edited")), Some(&bug("A"))),
            Verdict::LocalUpdate
        );
        assert_eq!(
            classify(Some(&original), Some(&bug("A-edited")), Some(&bug("A-remote"))),
            Verdict::Conflict(ConflictKind::Diverged)
        );
    }

    #[test]
    fn test_synced_at_never_counts() {
        let original = bug("A");
        let mut local = bug("A");
        local.synced_at = Some(Utc::now());
        let mut remote = bug("A");
        remote.synced_at = Some(Utc::now());
        assert_eq!(
            classify(Some(&original), Some(&local), Some(&remote)),
            Verdict::Unchanged
        );
    }

    #[test]
    fn test_remote_closure_is_remote_update() {
        let original = bug("A");
        let mut remote = bug("A");
        remote.state = IssueState::Closed;
        remote.state_reason = Some("completed".to_string());
        assert_eq!(
            classify(Some(&original), Some(&original), Some(&remote)),
            Verdict::RemoteUpdate
        );
    }

    #[test]
    fn test_actions() {
        let conflict = Verdict::Conflict(ConflictKind::Diverged);
        assert_eq!(
            conflict.action(ConflictPolicy::Skip),
            Action::Skip(ConflictKind::Diverged)
        );
        assert_eq!(conflict.action(ConflictPolicy::DiscardLocal), Action::Write);
        assert_eq!(Verdict::LocalUpdate.action(ConflictPolicy::DiscardLocal), Action::Keep);
        assert_eq!(Verdict::Added.action(ConflictPolicy::Skip), Action::Write);
    }
}
