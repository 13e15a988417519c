/// Failures reading, validating or writing the store configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("not initialized: {0} does not exist (run `issue-sync init` first)")]
    NotFound(String),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config:\n{}", bullet_list(.0))]
    Invalid(Vec<String>),
    #[error("could not write config: {0:#}")]
    Write(anyhow::Error),
}

fn bullet_list(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}
