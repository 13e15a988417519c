//! Auxiliary caches of remote vocabulary (labels, milestones, issue types,
//! projects). Read-mostly, refreshed on a full pull.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::fs_util::atomic_write_json;
use crate::remote::Label;

/// Colors handed to labels created by a push.
const LABEL_PALETTE: [&str; 15] = [
    "0052CC", "00875A", "5243AA", "FF5630", "FFAB00", "36B37E", "00B8D9", "6554C0", "FF8B00",
    "57D9A3", "1D7AFC", "E774BB", "8777D9", "2684FF", "FF991F",
];

/// On-disk cache file: `{"entries": [...], "syncedAt": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cache<T> {
    #[serde(default = "Vec::new")]
    pub entries: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            synced_at: None,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Cache<T> {
    /// Build a cache with entries sorted case-insensitively by `key`.
    pub fn new(mut entries: Vec<T>, synced_at: DateTime<Utc>, key: impl Fn(&T) -> &str) -> Self {
        entries.sort_by_key(|entry| key(entry).to_lowercase());
        Self {
            entries,
            synced_at: Some(synced_at),
        }
    }

    /// A missing cache file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse cache {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}

/// Lowercase label name to hex color.
pub fn label_colors(cache: &Cache<Label>) -> HashMap<String, String> {
    cache
        .entries
        .iter()
        .map(|l| (l.name.to_lowercase(), l.color.clone()))
        .collect()
}

pub fn labels_from_colors(colors: &HashMap<String, String>, synced_at: DateTime<Utc>) -> Cache<Label> {
    let entries = colors
        .iter()
        .map(|(name, color)| Label {
            name: name.clone(),
            color: color.clone(),
        })
        .collect();
    Cache::new(entries, synced_at, |l: &Label| l.name.as_str())
}

pub fn has_label(cache: &Cache<Label>, name: &str) -> bool {
    cache
        .entries
        .iter()
        .any(|l| l.name.eq_ignore_ascii_case(name))
}

/// Pick a color for a new label from the fixed palette.
pub fn random_label_color<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    LABEL_PALETTE[rng.gen_range(0..LABEL_PALETTE.len())]
}
