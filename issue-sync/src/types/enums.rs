use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an issue. The local directory is derived from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

impl IssueState {
    /// Name of the store subdirectory holding issues in this state.
    pub fn dir_name(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }

    pub fn other(self) -> IssueState {
        match self {
            IssueState::Open => IssueState::Closed,
            IssueState::Closed => IssueState::Open,
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for IssueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(IssueState::Open),
            "closed" => Ok(IssueState::Closed),
            _ => Err(format!("Unknown state: '{s}'. Expected: open, closed")),
        }
    }
}

/// Which lifecycle states a remote list query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Open,
    All,
}

impl fmt::Display for ListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListState::Open => write!(f, "open"),
            ListState::All => write!(f, "all"),
        }
    }
}

/// Named state change derived from the old and new lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateTransition {
    Close,
    Reopen,
}

impl StateTransition {
    pub fn between(old: IssueState, new: IssueState) -> Option<StateTransition> {
        match (old, new) {
            (IssueState::Open, IssueState::Closed) => Some(StateTransition::Close),
            (IssueState::Closed, IssueState::Open) => Some(StateTransition::Reopen),
            _ => None,
        }
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransition::Close => write!(f, "close"),
            StateTransition::Reopen => write!(f, "reopen"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_state_from_str() {
        assert_eq!("open".parse::<IssueState>().unwrap(), IssueState::Open);
        assert_eq!("CLOSED".parse::<IssueState>().unwrap(), IssueState::Closed);
        assert!("merged".parse::<IssueState>().is_err());
    }

    #[test]
    fn test_issue_state_dir_name() {
        assert_eq!(IssueState::Open.dir_name(), "open");
        assert_eq!(IssueState::Closed.dir_name(), "closed");
        assert_eq!(IssueState::Open.other(), IssueState::Closed);
    }

    #[test]
    fn test_state_transition_between() {
        assert_eq!(
            StateTransition::between(IssueState::Open, IssueState::Closed),
            Some(StateTransition::Close)
        );
        assert_eq!(
            StateTransition::between(IssueState::Closed, IssueState::Open),
            Some(StateTransition::Reopen)
        );
        assert_eq!(
            StateTransition::between(IssueState::Open, IssueState::Open),
            None
        );
    }

    #[test]
    fn test_issue_state_serde_lowercase() {
        let yaml = serde_yaml::to_string(&IssueState::Closed).unwrap();
        assert_eq!(yaml.trim(), "closed");
    }
}
