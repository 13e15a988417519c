//! Push Reconciler: send local edits, new records and pending comments to the
//! remote service.
//!
//! Records with a temporary identifier are created first, in path order. Each
//! canonical number is folded into the remap table and applied to the whole
//! store before anything else is sent, so later calls never carry a stale
//! temporary reference. Updates follow, batched when the client allows, then
//! comments. A record gets its snapshot set equal to the local copy as soon as
//! its own sequence succeeds, so an interrupted push keeps what already
//! landed; a failure is reported for that record only.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::cache::{self, Cache};
use crate::cancel::CancelToken;
use crate::comment::{self, PendingComment};
use crate::config::loader::read_config;
use crate::diff::{compute_change, only_relationship_order_changed, summarize_changes, FieldChange};
use crate::error::ParseError;
use crate::pull::not_initialized;
use crate::remap::{apply_mapping, dangling_local_refs, IdMapping};
use crate::remote::{creation_fields, BatchUpdate, Created, IssueChange, IssueClient, Label};
use crate::store::{IssueStore, LocalIssue};
use crate::sync_lock;
use crate::types::issue::{Issue, IssueNumber};

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Identifiers or record paths; empty means every record
    pub targets: Vec<String>,
    /// Report the plan without calling the remote service or writing files
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub temporary: IssueNumber,
    pub number: IssueNumber,
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushedUpdate {
    pub number: IssueNumber,
    pub title: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub number: IssueNumber,
    pub message: String,
}

/// What a push would do for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPush {
    pub number: IssueNumber,
    pub title: String,
    pub create: bool,
    pub changes: Vec<FieldChange>,
    pub comment: bool,
}

#[derive(Debug, Default)]
pub struct PushReport {
    pub created: Vec<CreatedIssue>,
    pub updated: Vec<PushedUpdate>,
    pub comments: Vec<IssueNumber>,
    pub failures: Vec<PushFailure>,
    pub warnings: Vec<String>,
    pub parse_errors: Vec<ParseError>,
    /// Store-relative paths of other records rewritten by the remap pass
    pub remapped: Vec<String>,
    pub labels_created: Vec<String>,
    /// Filled by a dry run only
    pub planned: Vec<PlannedPush>,
}

impl PushReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.comments.is_empty()
            && self.failures.is_empty()
            && self.planned.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Structured references the remote service can accept: temporary ones are
/// dropped.
fn sendable(issue: &Issue) -> Issue {
    let mut sent = issue.clone();
    if sent.parent.as_ref().is_some_and(IssueNumber::is_local) {
        sent.parent = None;
    }
    sent.blocked_by.retain(|r| !r.is_local());
    sent.blocks.retain(|r| !r.is_local());
    sent.synced_at = None;
    sent
}

/// Run one push against `client`. `rng` picks colors for new labels.
pub async fn push<R: Rng + ?Sized>(
    store: &IssueStore,
    client: &dyn IssueClient,
    options: &PushOptions,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<PushReport> {
    read_config(&store.paths().config_path).map_err(not_initialized)?;
    if options.dry_run {
        return plan(store, options);
    }
    let _lock = cancel.run(sync_lock::acquire_store(store.paths())).await??;

    let loaded = store.list()?;
    let targets = store.resolve_targets(&options.targets)?;
    let selected: Vec<usize> = if targets.is_empty() {
        (0..loaded.issues.len()).collect()
    } else {
        loaded.select(&targets)?;
        (0..loaded.issues.len())
            .filter(|&i| targets.contains(&loaded.issues[i].issue.number))
            .collect()
    };

    let mut pusher = Pusher {
        store,
        client,
        cancel,
        records: loaded.issues,
        selected,
        comments: comment::load_all(store.paths()),
        mapping: IdMapping::new(),
        created: HashSet::new(),
        settled: HashSet::new(),
        failed: HashSet::new(),
        now: Utc::now(),
        report: PushReport {
            parse_errors: loaded.errors,
            ..Default::default()
        },
    };

    let wanted = pusher.wanted_labels();
    pusher.ensure_labels(wanted, rng).await?;
    pusher.create_all().await?;
    pusher.update_all().await?;
    pusher.post_comments().await?;
    pusher.check_dangling();

    let report = pusher.report;
    info!(
        "push: {} created, {} updated, {} comments, {} failed",
        report.created.len(),
        report.updated.len(),
        report.comments.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Dry run: what each selected record would send.
fn plan(store: &IssueStore, options: &PushOptions) -> Result<PushReport> {
    let loaded = store.list()?;
    let targets = store.resolve_targets(&options.targets)?;
    let selected: Vec<&LocalIssue> = if targets.is_empty() {
        loaded.issues.iter().collect()
    } else {
        loaded.select(&targets)?
    };
    let comments = comment::load_all(store.paths());

    let mut report = PushReport {
        parse_errors: loaded.errors.clone(),
        ..Default::default()
    };
    for item in selected {
        let issue = &item.issue;
        let comment = comments.contains_key(&issue.number);
        let (create, changes) = if issue.number.is_local() {
            (true, Vec::new())
        } else {
            match store.read_original(&issue.number)? {
                Some(original) => (false, summarize_changes(&original, issue)),
                None => {
                    report.warn(format!(
                        "#{} has no snapshot; pull it before pushing",
                        issue.number
                    ));
                    continue;
                }
            }
        };
        if create || comment || !changes.is_empty() {
            report.planned.push(PlannedPush {
                number: issue.number.clone(),
                title: issue.title.clone(),
                create,
                changes,
                comment,
            });
        }
    }
    Ok(report)
}

struct Pusher<'a> {
    store: &'a IssueStore,
    client: &'a dyn IssueClient,
    cancel: &'a CancelToken,
    /// Every loaded record; the remap pass covers all of them
    records: Vec<LocalIssue>,
    /// Indices into `records` that this push sends
    selected: Vec<usize>,
    comments: BTreeMap<IssueNumber, PendingComment>,
    mapping: IdMapping,
    /// Records created during this push
    created: HashSet<usize>,
    /// Records whose snapshot already matches the local copy
    settled: HashSet<usize>,
    failed: HashSet<usize>,
    now: DateTime<Utc>,
    report: PushReport,
}

impl<'a> Pusher<'a> {
    fn fail(&mut self, idx: usize, message: String) {
        let number = self.records[idx].issue.number.clone();
        warn!("push of #{number} failed: {message}");
        self.failed.insert(idx);
        self.report.failures.push(PushFailure { number, message });
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(crate::error::SyncError::Cancelled.into());
        }
        Ok(())
    }

    fn relative(&self, idx: usize) -> String {
        self.store.paths().relative(&self.records[idx].path)
    }

    // -----------------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------------

    /// Labels a selected record is about to add remotely.
    fn wanted_labels(&self) -> BTreeSet<String> {
        let mut wanted = BTreeSet::new();
        for &idx in &self.selected {
            let issue = &self.records[idx].issue;
            if issue.number.is_local() {
                wanted.extend(issue.labels.iter().cloned());
                continue;
            }
            if let Ok(Some(original)) = self.store.read_original(&issue.number) {
                wanted.extend(compute_change(&original, issue).add_labels);
            }
        }
        wanted
    }

    /// Create labels the cache does not know, best effort.
    async fn ensure_labels<R: Rng + ?Sized>(
        &mut self,
        wanted: BTreeSet<String>,
        rng: &mut R,
    ) -> Result<()> {
        if wanted.is_empty() {
            return Ok(());
        }
        let store = self.store;
        let path = &store.paths().labels_path;
        let mut labels: Cache<Label> = match Cache::load(path) {
            Ok(labels) => labels,
            Err(e) => {
                self.report.warn(format!("ignoring label cache: {e:#}"));
                return Ok(());
            }
        };
        if labels.synced_at.is_none() {
            debug!("label cache never refreshed; not creating labels");
            return Ok(());
        }

        let missing: Vec<String> = wanted
            .into_iter()
            .filter(|name| !cache::has_label(&labels, name))
            .collect();
        for name in missing {
            let color = cache::random_label_color(rng);
            match self.cancel.run(self.client.create_label(&name, color)).await? {
                Ok(()) => {
                    info!("created label {name} ({color})");
                    labels.entries.push(Label {
                        name: name.clone(),
                        color: color.to_string(),
                    });
                    self.report.labels_created.push(name);
                }
                Err(e) => self.report.warn(format!("could not create label {name}: {e}")),
            }
        }

        if !self.report.labels_created.is_empty() {
            labels.entries.sort_by_key(|l| l.name.to_lowercase());
            if let Err(e) = labels.save(path) {
                self.report.warn(format!("could not write label cache: {e:#}"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Creation and remap
    // -----------------------------------------------------------------------

    async fn create_all(&mut self) -> Result<()> {
        let mut pending: Vec<usize> = self
            .selected
            .iter()
            .copied()
            .filter(|&idx| self.records[idx].issue.number.is_local())
            .collect();
        pending.sort_by(|&a, &b| self.records[a].path.cmp(&self.records[b].path));

        for idx in pending {
            self.check_cancelled()?;
            let temporary = self.records[idx].issue.number.clone();
            let sent = sendable(&self.records[idx].issue);

            match self.cancel.run(self.client.create_issue(&sent)).await? {
                Ok(Created { number, follow_up }) => {
                    info!("created #{number} from {temporary}");
                    // The snapshot holds only what the remote service received
                    let snapshot = if follow_up.is_some() {
                        creation_fields(&sent)
                    } else {
                        sent
                    };
                    if let Err(e) = self.adopt_number(idx, &temporary, &number, snapshot) {
                        self.fail(
                            idx,
                            format!("created as #{number} but local files were not updated: {e:#}"),
                        );
                    } else if let Some(e) = follow_up {
                        self.fail(
                            idx,
                            format!("created as #{number}, but setting its remaining fields failed: {e}"),
                        );
                    }
                }
                Err(e) => self.fail(idx, e.to_string()),
            }
        }
        Ok(())
    }

    /// Retire `temporary` in favour of `number` across the store.
    fn adopt_number(
        &mut self,
        idx: usize,
        temporary: &IssueNumber,
        number: &IssueNumber,
        mut sent: Issue,
    ) -> Result<()> {
        self.mapping.insert(temporary.clone(), number.clone());
        self.created.insert(idx);
        self.records[idx].issue.number = number.clone();

        // The snapshot is what the remote service now holds
        sent.number = number.clone();
        self.store.remove_original(temporary)?;
        self.store.write_original(&sent)?;

        if let Some(pending) = self.comments.remove(temporary) {
            let moved = comment::rekey(&pending, number)?;
            self.comments.insert(number.clone(), moved);
        }

        self.remap_all(idx)?;
        self.report.created.push(CreatedIssue {
            temporary: temporary.clone(),
            number: number.clone(),
            title: self.records[idx].issue.title.clone(),
            path: self.relative(idx),
        });
        Ok(())
    }

    /// Apply the remap table to every record and persist what changed.
    /// `renumbered` is rewritten regardless since its file name changes.
    fn remap_all(&mut self, renumbered: usize) -> Result<()> {
        for idx in 0..self.records.len() {
            let changed = apply_mapping(&mut self.records[idx].issue, &self.mapping);
            if !changed && idx != renumbered {
                continue;
            }
            let record = &self.records[idx];
            let path = self.store.write(Some(record.path.as_path()), &record.issue)?;
            self.records[idx].path = path;
            if changed && idx != renumbered {
                let rel = self.relative(idx);
                debug!("remapped references in {rel}");
                if !self.report.remapped.contains(&rel) {
                    self.report.remapped.push(rel);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    async fn update_all(&mut self) -> Result<()> {
        let mut pending: Vec<(usize, IssueChange)> = Vec::new();
        for idx in self.selected.clone() {
            if self.failed.contains(&idx) {
                continue;
            }
            let issue = self.records[idx].issue.clone();
            if issue.number.is_local() {
                continue;
            }
            let original = match self.store.read_original(&issue.number) {
                Ok(Some(original)) => original,
                Ok(None) => {
                    self.report.warn(format!(
                        "#{} has no snapshot; pull it before pushing",
                        issue.number
                    ));
                    continue;
                }
                Err(e) => {
                    self.fail(idx, format!("{e:#}"));
                    continue;
                }
            };
            let change = compute_change(&original, &issue);
            if change.is_empty() {
                if self.created.contains(&idx) {
                    self.settle(idx);
                } else if only_relationship_order_changed(&original, &issue) {
                    self.restore_relationship_order(idx, &original);
                }
                continue;
            }
            self.report.updated.push(PushedUpdate {
                number: issue.number.clone(),
                title: issue.title.clone(),
                changes: summarize_changes(&original, &issue),
            });
            pending.push((idx, change));
        }

        let (batchable, mut single): (Vec<_>, Vec<_>) = if self.client.supports_batch_update() {
            pending.into_iter().partition(|(_, change)| change.is_batchable())
        } else {
            (Vec::new(), pending)
        };

        if batchable.len() > 1 {
            self.check_cancelled()?;
            let updates: Vec<BatchUpdate> = batchable
                .iter()
                .map(|(idx, change)| BatchUpdate {
                    number: self.records[*idx].issue.number.clone(),
                    change: change.clone(),
                })
                .collect();
            match self.cancel.run(self.client.update_issues_batch(&updates)).await? {
                Ok(()) => {
                    debug!("batched {} updates", updates.len());
                    for (idx, _) in &batchable {
                        self.settle(*idx);
                    }
                }
                Err(e) => {
                    self.report
                        .warn(format!("batched update failed, retrying one by one: {e}"));
                    single.extend(batchable);
                }
            }
        } else {
            single.extend(batchable);
        }
        single.sort_by_key(|(idx, _)| *idx);

        for (idx, change) in single {
            self.check_cancelled()?;
            let number = self.records[idx].issue.number.clone();
            match self.cancel.run(self.client.update_issue(&number, &change)).await? {
                Ok(()) => {
                    debug!("updated #{number}");
                    self.settle(idx);
                }
                Err(e) => self.fail(idx, e.to_string()),
            }
        }
        self.report
            .updated
            .retain(|u| !self.report.failures.iter().any(|f| f.number == u.number));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Comments and bookkeeping
    // -----------------------------------------------------------------------

    async fn post_comments(&mut self) -> Result<()> {
        for idx in self.selected.clone() {
            if self.failed.contains(&idx) {
                continue;
            }
            let number = self.records[idx].issue.number.clone();
            if number.is_local() {
                continue;
            }
            let Some(pending) = self.comments.get(&number).cloned() else {
                continue;
            };
            self.check_cancelled()?;
            match self.cancel.run(self.client.add_comment(&number, &pending.body)).await? {
                Ok(()) => {
                    debug!("posted comment on #{number}");
                    self.settle(idx);
                    self.report.comments.push(number.clone());
                    if let Err(e) = comment::delete(&pending) {
                        self.report.warn(format!(
                            "comment on #{number} was posted but its file remains: {e:#}"
                        ));
                    }
                }
                Err(e) => self.fail(idx, format!("comment: {e}")),
            }
        }
        Ok(())
    }

    /// Stamp a pushed record and make its snapshot equal to it. Runs once per
    /// record, right after its last remote call succeeded.
    fn settle(&mut self, idx: usize) {
        if self.failed.contains(&idx) || !self.settled.insert(idx) {
            return;
        }
        self.records[idx].issue.synced_at = Some(self.now);
        let record = &self.records[idx];
        let result = self
            .store
            .write(Some(record.path.as_path()), &record.issue)
            .and_then(|path| {
                self.store.write_original(&record.issue)?;
                Ok(path)
            });
        match result {
            Ok(path) => self.records[idx].path = path,
            Err(e) => {
                let number = self.records[idx].issue.number.clone();
                self.report
                    .warn(format!("#{number} was pushed but local files were not updated: {e:#}"));
            }
        }
    }

    /// Put blocked-by and blocks back in snapshot order when order is the
    /// only difference.
    fn restore_relationship_order(&mut self, idx: usize, original: &Issue) {
        let number = self.records[idx].issue.number.clone();
        self.records[idx].issue.blocked_by = original.blocked_by.clone();
        self.records[idx].issue.blocks = original.blocks.clone();
        let record = &self.records[idx];
        match self.store.write(Some(record.path.as_path()), &record.issue) {
            Ok(path) => {
                self.records[idx].path = path;
                self.report.warn(format!(
                    "#{number}: blocked-by/blocks order cannot be pushed; restored the synced order"
                ));
            }
            Err(e) => self.report.warn(format!("#{number}: could not restore relationship order: {e:#}")),
        }
    }

    /// Temporary references still present in selected records.
    fn check_dangling(&mut self) {
        let existing: HashSet<IssueNumber> = self
            .records
            .iter()
            .map(|r| r.issue.number.clone())
            .collect();
        let mut warnings = Vec::new();
        for &idx in &self.selected {
            let issue = &self.records[idx].issue;
            for target in dangling_local_refs(issue) {
                let reason = if existing.contains(&target) {
                    "has not been pushed yet"
                } else {
                    "does not exist locally"
                };
                warnings.push(format!(
                    "#{} references #{target}, which {reason}; reference left as is",
                    issue.number
                ));
            }
        }
        for warning in warnings {
            self.report.warn(warning);
        }
    }
}
