//! IssueCycle record and related types
//!
//! An IssueCycle is one issue's journey from opened to a terminal verdict. Its
//! fields are crate-private: only the lifecycle machine mutates a cycle, everything
//! else reads it through accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::feedback::Feedback;
use super::outcome::{Change, Outcome};
use super::state::{Action, CycleState};
use crate::error::{CyclrError, Result};

/// The issue a cycle works on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Identifier on the hosting platform, e.g. "ABC-1"
    pub id: String,
    pub title: String,
    pub description: String,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// One executed action, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub at: DateTime<Utc>,
    /// State the action was issued from
    pub state: CycleState,
    pub action: Action,
    pub outcome: Outcome,
    /// State after the outcome was applied
    pub next_state: CycleState,
    /// Iteration counter after the outcome was applied
    pub iteration: u32,
    /// Feedback handed to code generation on a loop-back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// Why a cycle ended without merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbandonReason {
    Fatal { action: Action, reason: String },
    RetriesExhausted { action: Action, attempts: u32, reason: String },
    Cancelled { reason: String },
    Closed { reason: String },
    IterationsExhausted { iterations: u32 },
    BudgetExhausted { actions: u32 },
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Fatal { action, reason } => write!(f, "{} failed: {}", action, reason),
            AbandonReason::RetriesExhausted {
                action,
                attempts,
                reason,
            } => write!(f, "{} gave up after {} attempts: {}", action, attempts, reason),
            AbandonReason::Cancelled { reason } => write!(f, "cancelled: {}", reason),
            AbandonReason::Closed { reason } => write!(f, "closed: {}", reason),
            AbandonReason::IterationsExhausted { iterations } => {
                write!(f, "no convergence after {} iterations", iterations)
            }
            AbandonReason::BudgetExhausted { actions } => {
                write!(f, "action budget of {} exhausted", actions)
            }
        }
    }
}

/// Terminal result of a cycle. Set once, never revised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Merged,
    Abandoned(AbandonReason),
    Exhausted,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Merged)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Merged => f.write_str("merged"),
            Verdict::Abandoned(reason) => write!(f, "abandoned ({})", reason),
            Verdict::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// The unit of work: one issue's journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCycle {
    pub(crate) issue: Issue,
    pub(crate) pr_id: Option<String>,
    pub(crate) state: CycleState,
    pub(crate) iteration: u32,
    pub(crate) max_iterations: u32,
    pub(crate) history: Vec<HistoryRecord>,
    pub(crate) last_error: Option<String>,
    /// Most recent generated change, needed to re-issue CreatePullRequest or ApplyFix after a crash
    pub(crate) change: Option<Change>,
    pub(crate) abandon_reason: Option<AbandonReason>,
    pub(crate) verdict: Option<Verdict>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl IssueCycle {
    /// Create a fresh cycle in `Opened`
    pub fn new(issue: Issue, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            issue,
            pr_id: None,
            state: CycleState::Opened,
            iteration: 0,
            max_iterations,
            history: Vec::new(),
            last_error: None,
            change: None,
            abandon_reason: None,
            verdict: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check invariants of a cycle read back from storage
    pub fn validate(&self) -> Result<()> {
        if self.iteration > self.max_iterations {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} has iteration {} above max {}",
                self.issue.id, self.iteration, self.max_iterations
            )));
        }
        if self.state.is_terminal() != self.verdict.is_some() {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} in state {} with verdict {:?}",
                self.issue.id, self.state, self.verdict
            )));
        }
        Ok(())
    }

    pub fn issue(&self) -> &Issue {
        &self.issue
    }

    pub fn issue_id(&self) -> &str {
        &self.issue.id
    }

    pub fn pr_id(&self) -> Option<&str> {
        self.pr_id.as_deref()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn change(&self) -> Option<&Change> {
        self.change.as_ref()
    }

    pub fn abandon_reason(&self) -> Option<&AbandonReason> {
        self.abandon_reason.as_ref()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Update the updated_at timestamp
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            issue_id: self.issue.id.clone(),
            state: self.state,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            is_terminal: self.is_terminal(),
            is_success: self.state == CycleState::Merged,
            pr_id: self.pr_id.clone(),
            history_len: self.history.len(),
            last_error: self.last_error.clone(),
            verdict: self.verdict.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Compact status view of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub issue_id: String,
    pub state: CycleState,
    pub iteration: u32,
    pub max_iterations: u32,
    pub is_terminal: bool,
    pub is_success: bool,
    pub pr_id: Option<String>,
    pub history_len: usize,
    pub last_error: Option<String>,
    pub verdict: Option<Verdict>,
    pub updated_at: DateTime<Utc>,
}
