//! Pull Reconciler: bring remote changes into the local store.
//!
//! One pull runs under the store lock and goes through
//! load local -> fetch remote -> reconcile each -> persist side effects ->
//! restore orphans. Nothing local is touched until every fetch has joined.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{self, Cache};
use crate::cancel::CancelToken;
use crate::config::loader::{read_config, write_config};
use crate::config::ConfigError;
use crate::conflict::{classify, Action, ConflictKind, ConflictPolicy, Verdict};
use crate::diff::{summarize_changes, FieldChange};
use crate::error::{ParseError, SyncError};
use crate::remote::{IssueClient, Label, RemoteError};
use crate::store::{IssueStore, LoadResult};
use crate::sync_lock;
use crate::types::enums::{IssueState, ListState};
use crate::types::issue::{Issue, IssueNumber};

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Identifiers or record paths; empty means "everything"
    pub targets: Vec<String>,
    /// Include closed issues in the list query
    pub all: bool,
    pub label: Option<String>,
    pub policy: ConflictPolicy,
}

impl PullOptions {
    /// A full pull refreshes caches and advances `last_full_pull`.
    pub fn is_full(&self) -> bool {
        self.targets.is_empty() && self.label.is_none()
    }
}

/// A record written from the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledIssue {
    pub number: IssueNumber,
    pub title: String,
    /// Store-relative path after the write
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedIssue {
    pub issue: PulledIssue,
    pub changes: Vec<FieldChange>,
    /// Previous store-relative path when the file moved
    pub renamed_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub number: IssueNumber,
    pub kind: ConflictKind,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct PullReport {
    pub added: Vec<PulledIssue>,
    pub updated: Vec<UpdatedIssue>,
    pub restored: Vec<PulledIssue>,
    /// Sorted by identifier
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
    pub parse_errors: Vec<ParseError>,
    pub unchanged: usize,
    /// Records with local edits waiting for a push
    pub local_changes: usize,
    /// Lowercase label name to color, for decorating label diffs
    pub label_colors: HashMap<String, String>,
}

impl PullReport {
    pub fn wrote_anything(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.restored.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Order identifiers numerically where they are numbers.
pub(crate) fn display_order(a: &IssueNumber, b: &IssueNumber) -> std::cmp::Ordering {
    (a.as_str().len(), a.as_str()).cmp(&(b.as_str().len(), b.as_str()))
}

/// A missing config means the store was never initialized.
pub(crate) fn not_initialized(err: ConfigError) -> anyhow::Error {
    match err {
        ConfigError::NotFound(_) => SyncError::NotInitialized.into(),
        other => other.into(),
    }
}

/// Run one pull against `client`.
pub async fn pull(
    store: &IssueStore,
    client: &dyn IssueClient,
    options: &PullOptions,
    cancel: &CancelToken,
) -> Result<PullReport> {
    let paths = store.paths();
    let mut config = read_config(&paths.config_path).map_err(not_initialized)?;
    let _lock = cancel.run(sync_lock::acquire_store(paths)).await??;

    let loaded = store.list()?;
    let mut report = PullReport {
        parse_errors: loaded.errors.clone(),
        ..Default::default()
    };
    let broken = loaded.broken_numbers();

    let cached_labels: Cache<Label> = load_cache(&paths.labels_path, &mut report);
    report.label_colors = cache::label_colors(&cached_labels);

    // FETCH_REMOTE
    let targets = store.resolve_targets(&options.targets)?;
    let remote = if targets.is_empty() {
        fetch_listed(client, options, &loaded, cancel, &mut report).await?
    } else {
        fetch_targeted(client, &targets, cancel, &mut report).await?
    };
    let now = Utc::now();

    // RECONCILE_EACH
    let mut numbers: Vec<&IssueNumber> = remote.keys().collect();
    numbers.sort_by(|a, b| display_order(a, b));
    let mut handled: HashSet<IssueNumber> = HashSet::new();
    for number in numbers {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }
        if broken.contains(number) {
            report.warn(format!("skipping #{number}: local file could not be parsed"));
            continue;
        }
        handled.insert(number.clone());
        if let Err(e) =
            reconcile_one(store, &loaded, &remote[number], options.policy, now, &mut report)
        {
            report.warn(format!("#{number}: {e:#}"));
        }
    }

    // PERSIST_SIDE_EFFECTS
    if options.is_full() {
        refresh_caches(store, client, cancel, now, &mut report).await?;
        config.sync.last_full_pull = Some(now);
        write_config(&paths.config_path, &config)
            .with_context(|| format!("Failed to write {}", paths.config_path.display()))?;
    }

    // RESTORE_ORPHANS
    let orphans: Vec<IssueNumber> = store
        .original_numbers()?
        .into_iter()
        .filter(|n| !n.is_local())
        .filter(|n| loaded.get(n).is_none() && !broken.contains(n) && !handled.contains(n))
        .filter(|n| targets.is_empty() || targets.contains(n))
        .collect();
    for number in orphans {
        restore_orphan(store, client, &number, cancel, now, &mut report).await?;
    }

    report.conflicts.sort_by(|a, b| display_order(&a.number, &b.number));
    info!(
        "pull: {} added, {} updated, {} restored, {} conflicts, {} unchanged",
        report.added.len(),
        report.updated.len(),
        report.restored.len(),
        report.conflicts.len(),
        report.unchanged
    );
    Ok(report)
}

fn load_cache<T: Serialize + DeserializeOwned>(path: &Path, report: &mut PullReport) -> Cache<T> {
    match Cache::load(path) {
        Ok(cache) => cache,
        Err(e) => {
            report.warn(format!("ignoring cache: {e:#}"));
            Cache::default()
        }
    }
}

/// List query plus, on an incremental pull, a batch fetch of local open
/// records so remote closures are still seen. List hits win.
async fn fetch_listed(
    client: &dyn IssueClient,
    options: &PullOptions,
    loaded: &LoadResult,
    cancel: &CancelToken,
    report: &mut PullReport,
) -> Result<HashMap<IssueNumber, Issue>> {
    let list_state = if options.all {
        ListState::All
    } else {
        ListState::Open
    };
    let batch_numbers: Vec<IssueNumber> = if options.all {
        Vec::new()
    } else {
        loaded
            .issues
            .iter()
            .filter(|item| item.state == IssueState::Open && !item.issue.number.is_local())
            .filter(|item| match &options.label {
                Some(label) => item.issue.labels.iter().any(|l| l == label),
                None => true,
            })
            .map(|item| item.issue.number.clone())
            .collect()
    };

    let list = client.list_issues(list_state, options.label.as_deref());
    let batch = async {
        if batch_numbers.is_empty() {
            Ok(HashMap::new())
        } else {
            client.get_issues_batch(&batch_numbers).await
        }
    };
    let (listed, batched) = cancel.run(future::join(list, batch)).await?;

    let listed = listed.context("Failed to list remote issues")?;
    let mut remote = match batched {
        Ok(found) => found,
        Err(e) => {
            report.warn(format!("batch fetch of local issues failed: {e}"));
            HashMap::new()
        }
    };
    debug!(
        "fetched {} listed and {} batched issues",
        listed.issues.len(),
        remote.len()
    );
    report.label_colors.extend(listed.label_colors);
    for issue in listed.issues {
        remote.insert(issue.number.clone(), issue);
    }
    Ok(remote)
}

async fn fetch_targeted(
    client: &dyn IssueClient,
    targets: &[IssueNumber],
    cancel: &CancelToken,
    report: &mut PullReport,
) -> Result<HashMap<IssueNumber, Issue>> {
    let mut numbers = Vec::with_capacity(targets.len());
    for number in targets {
        if number.is_local() {
            report.warn(format!("#{number} has not been pushed yet; nothing to pull"));
        } else {
            numbers.push(number.clone());
        }
    }
    if numbers.is_empty() {
        return Ok(HashMap::new());
    }

    let (fetched, labels) = cancel
        .run(future::join(
            client.get_issues_batch(&numbers),
            client.list_labels(),
        ))
        .await?;
    let fetched = fetched.context("Failed to fetch remote issues")?;
    match labels {
        Ok(labels) => report.label_colors.extend(
            labels
                .into_iter()
                .map(|l| (l.name.to_lowercase(), l.color)),
        ),
        Err(e) => report.warn(format!("could not fetch label colors, using cache: {e}")),
    }
    for number in &numbers {
        if !fetched.contains_key(number) {
            report.warn(format!("#{number} not found on remote"));
        }
    }
    Ok(fetched)
}

/// Write `remote` as the local record and its snapshot.
fn write_remote(
    store: &IssueStore,
    current: Option<&Path>,
    remote: &Issue,
    now: DateTime<Utc>,
) -> Result<(Issue, String)> {
    let mut issue = remote.clone();
    issue.synced_at = Some(now);
    let path = store.write(current, &issue)?;
    store.write_original(&issue)?;
    Ok((issue, store.paths().relative(&path)))
}

fn reconcile_one(
    store: &IssueStore,
    loaded: &LoadResult,
    remote: &Issue,
    policy: ConflictPolicy,
    now: DateTime<Utc>,
    report: &mut PullReport,
) -> Result<()> {
    let number = &remote.number;
    let local = loaded.get(number);
    let original = store.read_original(number)?;
    let verdict = classify(original.as_ref(), local.map(|l| &l.issue), Some(remote));
    debug!("#{number}: {verdict:?}");

    match verdict.action(policy) {
        Action::Keep => {
            match verdict {
                Verdict::LocalUpdate => report.local_changes += 1,
                _ => report.unchanged += 1,
            }
            if original.is_none() && verdict == Verdict::Unchanged {
                // First sight of an identical record: adopt it as the baseline
                let mut baseline = remote.clone();
                baseline.synced_at = Some(now);
                store.write_original(&baseline)?;
            }
        }
        Action::Skip(kind) => {
            let path = local
                .map(|l| store.paths().relative(&l.path))
                .unwrap_or_default();
            warn!("#{number}: conflict ({kind}), local file left untouched");
            report.conflicts.push(Conflict {
                number: number.clone(),
                kind,
                path,
            });
        }
        Action::Write => {
            let (written, path) = write_remote(store, local.map(|l| l.path.as_path()), remote, now)?;
            let pulled = PulledIssue {
                number: number.clone(),
                title: written.title.clone(),
                path,
            };
            match (verdict, local) {
                (Verdict::Added, _) => report.added.push(pulled),
                (Verdict::Restored, _) => report.restored.push(pulled),
                (_, Some(local)) => {
                    let old_path = store.paths().relative(&local.path);
                    let renamed_from = (old_path != pulled.path).then_some(old_path);
                    report.updated.push(UpdatedIssue {
                        changes: summarize_changes(&local.issue, &written),
                        issue: pulled,
                        renamed_from,
                    });
                }
                (_, None) => report.added.push(pulled),
            }
        }
    }
    Ok(())
}

/// Refresh the vocabulary caches. Each failure only warns.
async fn refresh_caches(
    store: &IssueStore,
    client: &dyn IssueClient,
    cancel: &CancelToken,
    now: DateTime<Utc>,
    report: &mut PullReport,
) -> Result<()> {
    let paths = store.paths();
    let (labels, milestones, issue_types, projects) = cancel
        .run(future::join4(
            client.list_labels(),
            client.list_milestones(),
            client.list_issue_types(),
            client.list_projects(),
        ))
        .await?;

    match labels {
        Ok(labels) => {
            report.label_colors.extend(
                labels
                    .iter()
                    .map(|l| (l.name.to_lowercase(), l.color.clone())),
            );
            save_cache(
                Ok(labels),
                &paths.labels_path,
                "labels",
                now,
                |l| l.name.as_str(),
                report,
            );
        }
        // Colors seen on pulled issues still make a usable cache
        Err(e) if !report.label_colors.is_empty() => {
            report.warn(format!(
                "could not refresh labels cache: {e}; keeping colors seen on issues"
            ));
            let fallback = cache::labels_from_colors(&report.label_colors, now);
            if let Err(e) = fallback.save(&paths.labels_path) {
                report.warn(format!("could not write labels cache: {e:#}"));
            }
        }
        Err(e) => save_cache::<Label>(
            Err(e),
            &paths.labels_path,
            "labels",
            now,
            |l| l.name.as_str(),
            report,
        ),
    }
    save_cache(milestones, &paths.milestones_path, "milestones", now, |m| m.title.as_str(), report);
    save_cache(issue_types, &paths.issue_types_path, "issue types", now, |t| t.name.as_str(), report);
    save_cache(projects, &paths.projects_path, "projects", now, |p| p.title.as_str(), report);
    Ok(())
}

fn save_cache<T: Serialize + DeserializeOwned>(
    fetched: Result<Vec<T>, RemoteError>,
    path: &Path,
    what: &str,
    now: DateTime<Utc>,
    key: impl Fn(&T) -> &str,
    report: &mut PullReport,
) {
    let entries = match fetched {
        Ok(entries) => entries,
        Err(e) => {
            report.warn(format!("could not refresh {what} cache: {e}"));
            return;
        }
    };
    if let Err(e) = Cache::new(entries, now, key).save(path) {
        report.warn(format!("could not write {what} cache: {e:#}"));
    }
}

/// Re-fetch a record whose snapshot exists but whose local file is gone.
async fn restore_orphan(
    store: &IssueStore,
    client: &dyn IssueClient,
    number: &IssueNumber,
    cancel: &CancelToken,
    now: DateTime<Utc>,
    report: &mut PullReport,
) -> Result<()> {
    match cancel.run(client.get_issue(number)).await? {
        Ok(remote) => match write_remote(store, None, &remote, now) {
            Ok((written, path)) => report.restored.push(PulledIssue {
                number: number.clone(),
                title: written.title,
                path,
            }),
            Err(e) => report.warn(format!("could not restore #{number}: {e:#}")),
        },
        Err(RemoteError::NotFound(_)) => {
            report.warn(format!(
                "#{number} was deleted locally and no longer exists on remote"
            ));
        }
        Err(e) => report.warn(format!("could not restore #{number}: {e}")),
    }
    Ok(())
}
