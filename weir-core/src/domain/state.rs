//! Execution states
//!
//! One lattice shared by executions, stages and steps:
//! `Waiting -> Building -> {Success, Fail, Skipped, Denied, Error, Abort}`,
//! plus `Pending`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    #[default]
    Waiting,
    Building,
    Success,
    Fail,
    Skipped,
    Denied,
    Error,
    Abort,
    Pending,
}

impl ExecutionState {
    /// True for every state except `Waiting` and `Building`
    pub fn is_finished(self) -> bool {
        !matches!(self, ExecutionState::Waiting | ExecutionState::Building)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Waiting => "Waiting",
            ExecutionState::Building => "Building",
            ExecutionState::Success => "Success",
            ExecutionState::Fail => "Fail",
            ExecutionState::Skipped => "Skipped",
            ExecutionState::Denied => "Denied",
            ExecutionState::Error => "Error",
            ExecutionState::Abort => "Abort",
            ExecutionState::Pending => "Pending",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_finished() {
        assert!(!ExecutionState::Waiting.is_finished());
        assert!(!ExecutionState::Building.is_finished());
        for state in [
            ExecutionState::Success,
            ExecutionState::Fail,
            ExecutionState::Skipped,
            ExecutionState::Denied,
            ExecutionState::Error,
            ExecutionState::Abort,
            ExecutionState::Pending,
        ] {
            assert!(state.is_finished(), "{} should be finished", state);
        }
    }
}
