//! Crash-safe file writes shared by the store, caches and config.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write data to a file atomically using temp file + rename pattern.
///
/// Either the old content or the new content is visible, never a
/// partially-written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Serialize as pretty JSON with a trailing newline and write atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(data)?;
    json.push('\n');
    atomic_write(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_and_leaves_no_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("file.md");

        atomic_write(&path, b"hello").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_atomic_write_json() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("test.json");

        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct TestData {
            value: String,
        }

        let data = TestData {
            value: "hello".to_string(),
        };
        atomic_write_json(&file_path, &data).unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: TestData = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, data);
    }
}
