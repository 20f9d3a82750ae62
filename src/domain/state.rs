//! Lifecycle states and the actions the driver issues between them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CyclrError;

/// Where an issue currently sits on its way from opened to merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Issue accepted, nothing generated yet
    Opened,
    /// A change exists but has not reached the PR branch
    CodeGenerated,
    /// PR opened with the first change
    PrCreated,
    /// A remediation commit was pushed, CI must run again
    CiPending,
    /// CI passed, review is next
    CiPassed,
    /// CI failed, loop back or exhaust
    CiFailed,
    /// Reviewer asked for changes, loop back or exhaust
    ChangesRequested,
    Merged,
    Abandoned,
}

impl CycleState {
    pub const ALL: [CycleState; 9] = [
        CycleState::Opened,
        CycleState::CodeGenerated,
        CycleState::PrCreated,
        CycleState::CiPending,
        CycleState::CiPassed,
        CycleState::CiFailed,
        CycleState::ChangesRequested,
        CycleState::Merged,
        CycleState::Abandoned,
    ];

    /// Returns true if no further action may run
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Merged | CycleState::Abandoned)
    }

    /// Returns true for the states that either loop back to code generation or exhaust
    pub fn is_loop_back_source(&self) -> bool {
        matches!(self, CycleState::CiFailed | CycleState::ChangesRequested)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Opened => "opened",
            CycleState::CodeGenerated => "code_generated",
            CycleState::PrCreated => "pr_created",
            CycleState::CiPending => "ci_pending",
            CycleState::CiPassed => "ci_passed",
            CycleState::CiFailed => "ci_failed",
            CycleState::ChangesRequested => "changes_requested",
            CycleState::Merged => "merged",
            CycleState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleState {
    type Err = CyclrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        CycleState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| CyclrError::Storage(format!("unknown cycle state: {}", s)))
    }
}

/// A command the driver issues to an external collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GenerateCode,
    CreatePullRequest,
    TriggerCi,
    RequestReview,
    ApplyFix,
    ClosePullRequest,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GenerateCode => "generate_code",
            Action::CreatePullRequest => "create_pull_request",
            Action::TriggerCi => "trigger_ci",
            Action::RequestReview => "request_review",
            Action::ApplyFix => "apply_fix",
            Action::ClosePullRequest => "close_pull_request",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
