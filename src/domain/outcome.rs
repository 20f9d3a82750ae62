//! Classified action outcomes and their payloads.
//!
//! The state machine only ever consumes an [`Outcome`]; raw collaborator
//! responses are turned into one by the classifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::state::Action;

/// Classified result of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The action produced a definitive answer, good or bad
    Success(Payload),
    /// Transient failure. Same action again after backoff.
    Retryable {
        reason: String,
        /// Lower bound for the next backoff, when the collaborator supplied one
        retry_after: Option<Duration>,
    },
    /// Unrecoverable. Always abandons the cycle.
    Fatal(String),
}

impl Outcome {
    pub fn success(payload: Payload) -> Self {
        Outcome::Success(payload)
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Outcome::Retryable {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn retry_after(reason: impl Into<String>, retry_after: Duration) -> Self {
        Outcome::Retryable {
            reason: reason.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Outcome::Fatal(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::Retryable { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }

    /// Lifecycle signal carried by this outcome, if any.
    ///
    /// Only CI and review results map to PASS/FAIL/APPROVED/CHANGES_REQUESTED;
    /// every fatal outcome maps to ERROR. Retryable outcomes carry no signal.
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Outcome::Success(Payload::Ci(report)) => Some(match report.verdict {
                CiVerdict::Pass => Signal::Pass,
                CiVerdict::Fail => Signal::Fail,
            }),
            Outcome::Success(Payload::Review(report)) => Some(match report.verdict {
                ReviewVerdict::Approved => Signal::Approved,
                ReviewVerdict::ChangesRequested => Signal::ChangesRequested,
            }),
            Outcome::Fatal(_) => Some(Signal::Error),
            _ => None,
        }
    }

    /// One-line description for logs and history listings
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success(payload) => format!("success: {}", payload.describe()),
            Outcome::Retryable { reason, .. } => format!("retryable: {}", reason),
            Outcome::Fatal(reason) => format!("fatal: {}", reason),
        }
    }
}

/// Structured data carried by a successful outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Generated(Change),
    PullRequest { pr_id: String },
    Ci(CiReport),
    Review(ReviewReport),
    FixApplied,
    PullRequestClosed,
}

impl Payload {
    /// The only action allowed to produce this payload
    pub fn produced_by(&self) -> Action {
        match self {
            Payload::Generated(_) => Action::GenerateCode,
            Payload::PullRequest { .. } => Action::CreatePullRequest,
            Payload::Ci(_) => Action::TriggerCi,
            Payload::Review(_) => Action::RequestReview,
            Payload::FixApplied => Action::ApplyFix,
            Payload::PullRequestClosed => Action::ClosePullRequest,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Payload::Generated(change) => format!("generated change ({})", change.summary),
            Payload::PullRequest { pr_id } => format!("pull request {}", pr_id),
            Payload::Ci(report) => match report.verdict {
                CiVerdict::Pass => "ci passed".to_string(),
                CiVerdict::Fail => format!(
                    "ci failed ({} checks, {} conflicts)",
                    report.failed_checks.len(),
                    report.conflicting_paths.len()
                ),
            },
            Payload::Review(report) => match report.verdict {
                ReviewVerdict::Approved => "review approved".to_string(),
                ReviewVerdict::ChangesRequested => {
                    format!("changes requested ({} comments)", report.comments.len())
                }
            },
            Payload::FixApplied => "fix applied".to_string(),
            Payload::PullRequestClosed => "pull request closed".to_string(),
        }
    }
}

/// A generated change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub diff: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiVerdict {
    Pass,
    Fail,
}

/// Definitive CI result for the PR head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiReport {
    pub verdict: CiVerdict,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub failed_checks: Vec<FailedCheck>,
    #[serde(default)]
    pub conflicting_paths: Vec<String>,
}

impl CiReport {
    pub fn pass() -> Self {
        Self {
            verdict: CiVerdict::Pass,
            logs: String::new(),
            failed_checks: vec![],
            conflicting_paths: vec![],
        }
    }

    pub fn fail(logs: impl Into<String>, failed_checks: Vec<FailedCheck>) -> Self {
        Self {
            verdict: CiVerdict::Fail,
            logs: logs.into(),
            failed_checks,
            conflicting_paths: vec![],
        }
    }

    pub fn with_conflicts(mut self, paths: Vec<String>) -> Self {
        self.conflicting_paths = paths;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub name: String,
    pub summary: Option<String>,
}

impl FailedCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

/// Definitive review result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub verdict: ReviewVerdict,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub comments: Vec<ReviewComment>,
}

impl ReviewReport {
    pub fn approved() -> Self {
        Self {
            verdict: ReviewVerdict::Approved,
            summary: String::new(),
            comments: vec![],
        }
    }

    pub fn changes_requested(summary: impl Into<String>, comments: Vec<ReviewComment>) -> Self {
        Self {
            verdict: ReviewVerdict::ChangesRequested,
            summary: summary.into(),
            comments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    /// Lenient parse of reviewer-supplied severities; unknown values are informational
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "major" | "high" => Severity::Major,
            "minor" | "low" => Severity::Minor,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::Major => "MAJOR",
            Severity::Minor => "MINOR",
            Severity::Info => "INFO",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub severity: Severity,
    pub description: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub suggestion: Option<String>,
}

impl ReviewComment {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            file: None,
            line: None,
            suggestion: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Lifecycle signal derived from CI and review outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Pass,
    Fail,
    ChangesRequested,
    Approved,
    Error,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Pass => "PASS",
            Signal::Fail => "FAIL",
            Signal::ChangesRequested => "CHANGES_REQUESTED",
            Signal::Approved => "APPROVED",
            Signal::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        let pass = Outcome::success(Payload::Ci(CiReport::pass()));
        let fail = Outcome::success(Payload::Ci(CiReport::fail("boom", vec![])));
        let approved = Outcome::success(Payload::Review(ReviewReport::approved()));
        let changes = Outcome::success(Payload::Review(ReviewReport::changes_requested("nope", vec![])));

        assert_eq!(pass.signal(), Some(Signal::Pass));
        assert_eq!(fail.signal(), Some(Signal::Fail));
        assert_eq!(approved.signal(), Some(Signal::Approved));
        assert_eq!(changes.signal(), Some(Signal::ChangesRequested));
        assert_eq!(Outcome::fatal("x").signal(), Some(Signal::Error));
        assert_eq!(Outcome::retryable("rate limited").signal(), None);
        assert_eq!(Outcome::success(Payload::FixApplied).signal(), None);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::ChangesRequested.to_string(), "CHANGES_REQUESTED");
        assert_eq!(Signal::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_payload_produced_by() {
        assert_eq!(
            Payload::PullRequest { pr_id: "7".into() }.produced_by(),
            Action::CreatePullRequest
        );
        assert_eq!(Payload::Ci(CiReport::pass()).produced_by(), Action::TriggerCi);
        assert_eq!(Payload::PullRequestClosed.produced_by(), Action::ClosePullRequest);
    }

    #[test]
    fn test_outcome_describe() {
        assert_eq!(Outcome::retryable("429").describe(), "retryable: 429");
        assert_eq!(Outcome::fatal("no id").describe(), "fatal: no id");
        let fail = Outcome::success(Payload::Ci(CiReport::fail("", vec![FailedCheck::new("test")])));
        assert_eq!(fail.describe(), "success: ci failed (1 checks, 0 conflicts)");
    }

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("major"), Severity::Major);
        assert_eq!(Severity::parse_lenient(" Minor "), Severity::Minor);
        assert_eq!(Severity::parse_lenient("nit"), Severity::Info);
        assert!(Severity::Critical < Severity::Minor);
    }

    #[test]
    fn test_outcome_serde_keeps_retry_hint() {
        let outcome = Outcome::retry_after("rate limited", Duration::from_secs(30));
        let json = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
