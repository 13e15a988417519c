pub mod config;
pub mod enums;
pub mod issue;

// Re-export commonly used types for convenience
pub use config::{RepositoryConfig, SyncConfig, SyncState};
pub use enums::{IssueState, ListState, StateTransition};
pub use issue::{Issue, IssueNumber, LOCAL_ID_PREFIX};
