use std::fs;
use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use super::paths::Paths;
use crate::fs_util::atomic_write;
use crate::types::config::{RepositoryConfig, SyncConfig};

/// Environment variable overriding the configured repository (`owner/repo`).
pub const REPO_ENV_VAR: &str = "ISSUE_SYNC_REPO";

/// Read the store configuration from disk.
pub fn read_config(config_path: &Path) -> Result<SyncConfig, ConfigError> {
    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(config_path.display().to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    if content.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}

/// Read the store configuration and apply environment overrides.
pub fn read_config_with_env(config_path: &Path) -> Result<SyncConfig, ConfigError> {
    let mut config = read_config(config_path)?;
    if let Ok(slug) = std::env::var(REPO_ENV_VAR) {
        match RepositoryConfig::parse(&slug) {
            Some(repo) => {
                debug!("repository overridden by {REPO_ENV_VAR}: {}", repo.slug());
                config.repository = repo;
            }
            None => {
                return Err(ConfigError::Invalid(vec![format!(
                    "{REPO_ENV_VAR} must look like owner/repo, got '{slug}'"
                )]))
            }
        }
    }
    Ok(config)
}

/// Check the configuration is usable for talking to the remote service.
pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    if config.repository.owner.trim().is_empty() {
        errors.push("repository.owner must not be empty".to_string());
    }
    if config.repository.repo.trim().is_empty() {
        errors.push("repository.repo must not be empty".to_string());
    }
    if config.lock_timeout_secs == Some(0) {
        errors.push("lock_timeout_secs must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

/// Write the store configuration atomically.
pub fn write_config(config_path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    atomic_write(config_path, yaml.as_bytes())
        .map_err(ConfigError::Write)
}

/// Whether the store at `paths` has been initialized.
pub fn config_exists(paths: &Paths) -> bool {
    paths.config_path.exists()
}

/// Create the store layout and write an initial config. Existing issues and
/// snapshots are left alone; an existing config keeps its sync state.
pub fn init_store(paths: &Paths, repository: RepositoryConfig) -> Result<SyncConfig, ConfigError> {
    for dir in [
        &paths.open_dir,
        &paths.closed_dir,
        &paths.sync_dir,
        &paths.originals_dir,
    ] {
        fs::create_dir_all(dir)?;
    }

    let mut config = match read_config(&paths.config_path) {
        Ok(existing) => existing,
        Err(ConfigError::NotFound(_)) => SyncConfig::default(),
        Err(err) => return Err(err),
    };
    config.repository = repository;
    validate_config(&config)?;
    write_config(&paths.config_path, &config)?;
    Ok(config)
}
