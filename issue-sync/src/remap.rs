//! Temporary identifiers and the remap pass that retires them.
//!
//! Records created offline get a temporary identifier (`T` + 6 characters).
//! Once the remote service assigns a canonical number, every reference to
//! the temporary one is rewritten across the whole local record graph.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use rand::Rng;
use regex::{Captures, Regex};

use crate::types::issue::{Issue, IssueNumber, LOCAL_ID_PREFIX};

const LOCAL_ID_SUFFIX_LEN: usize = 6;
const LOCAL_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Retired temporary identifier to canonical identifier.
pub type IdMapping = HashMap<IssueNumber, IssueNumber>;

fn local_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(T[a-zA-Z0-9]+)").expect("valid regex"))
}

/// Generate a temporary identifier not present in `used`.
pub fn generate_local_id<R: Rng + ?Sized>(rng: &mut R, used: &HashSet<IssueNumber>) -> IssueNumber {
    loop {
        let mut id = String::with_capacity(LOCAL_ID_SUFFIX_LEN + 1);
        id.push(LOCAL_ID_PREFIX);
        for _ in 0..LOCAL_ID_SUFFIX_LEN {
            let idx = rng.gen_range(0..LOCAL_ID_ALPHABET.len());
            id.push(char::from(LOCAL_ID_ALPHABET[idx]));
        }
        let candidate = IssueNumber::new(id);
        if !used.contains(&candidate) {
            return candidate;
        }
    }
}

/// Temporary identifiers referenced inline from a piece of text.
pub fn inline_local_refs(text: &str) -> Vec<IssueNumber> {
    local_ref_regex()
        .captures_iter(text)
        .map(|c| IssueNumber::new(&c[1]))
        .collect()
}

fn remap_text(text: &str, mapping: &IdMapping) -> Option<String> {
    let mut changed = false;
    let replaced = local_ref_regex().replace_all(text, |caps: &Captures| {
        match mapping.get(&IssueNumber::new(&caps[1])) {
            Some(canonical) => {
                changed = true;
                canonical.to_reference()
            }
            None => caps[0].to_string(),
        }
    });
    changed.then(|| replaced.into_owned())
}

fn remap_refs(refs: &mut [IssueNumber], mapping: &IdMapping) -> bool {
    let mut changed = false;
    for r in refs.iter_mut() {
        if let Some(canonical) = mapping.get(r) {
            *r = canonical.clone();
            changed = true;
        }
    }
    changed
}

/// Rewrite every reference in `issue` that appears in `mapping`. Returns
/// whether anything changed.
pub fn apply_mapping(issue: &mut Issue, mapping: &IdMapping) -> bool {
    if mapping.is_empty() {
        return false;
    }
    let mut changed = false;

    if let Some(body) = remap_text(&issue.body, mapping) {
        issue.body = body;
        changed = true;
    }
    if let Some(title) = remap_text(&issue.title, mapping) {
        issue.title = title;
        changed = true;
    }
    if let Some(parent) = issue.parent.as_mut() {
        if let Some(canonical) = mapping.get(parent) {
            *parent = canonical.clone();
            changed = true;
        }
    }
    changed |= remap_refs(&mut issue.blocked_by, mapping);
    changed |= remap_refs(&mut issue.blocks, mapping);
    changed
}

/// Temporary identifiers an issue still points at, structured or inline.
pub fn dangling_local_refs(issue: &Issue) -> Vec<IssueNumber> {
    let mut refs: Vec<IssueNumber> = issue
        .references()
        .filter(|r| r.is_local())
        .cloned()
        .chain(inline_local_refs(&issue.title))
        .chain(inline_local_refs(&issue.body))
        .filter(|r| *r != issue.number)
        .collect();
    refs.sort();
    refs.dedup();
    refs
}
