//! Remediation feedback built from a cycle's history.
//!
//! On a loop-back, code generation receives the latest CI failure or review verdict
//! as structured feedback. The same value is stored in history so every attempt can
//! be audited afterwards.

use serde::{Deserialize, Serialize};

use super::cycle::HistoryRecord;
use super::outcome::{CiReport, CiVerdict, Outcome, Payload, ReviewReport, ReviewVerdict};

/// What triggered the loop-back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Ci,
    Review,
}

/// Feedback for one remediation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Iteration this feedback starts (1-based)
    pub iteration: u32,
    pub source: FeedbackSource,
    pub ci: Option<CiReport>,
    pub review: Option<ReviewReport>,
    /// Summary of the change being corrected
    pub previous_summary: Option<String>,
}

impl Feedback {
    pub fn from_ci(iteration: u32, report: CiReport) -> Self {
        Self {
            iteration,
            source: FeedbackSource::Ci,
            ci: Some(report),
            review: None,
            previous_summary: None,
        }
    }

    pub fn from_review(iteration: u32, report: ReviewReport) -> Self {
        Self {
            iteration,
            source: FeedbackSource::Review,
            ci: None,
            review: Some(report),
            previous_summary: None,
        }
    }

    pub fn with_previous_summary(mut self, summary: impl Into<String>) -> Self {
        self.previous_summary = Some(summary.into());
        self
    }

    /// Build feedback from the most recent negative CI or review result in history.
    ///
    /// Returns None when the history holds no such result.
    pub fn from_history(history: &[HistoryRecord], iteration: u32) -> Option<Self> {
        let previous_summary = history.iter().rev().find_map(|r| match &r.outcome {
            Outcome::Success(Payload::Generated(change)) => Some(change.summary.clone()),
            _ => None,
        });

        let feedback = history.iter().rev().find_map(|r| match &r.outcome {
            Outcome::Success(Payload::Ci(report)) if report.verdict == CiVerdict::Fail => {
                Some(Feedback::from_ci(iteration, report.clone()))
            }
            Outcome::Success(Payload::Review(report))
                if report.verdict == ReviewVerdict::ChangesRequested =>
            {
                Some(Feedback::from_review(iteration, report.clone()))
            }
            _ => None,
        })?;

        Some(match previous_summary {
            Some(summary) => feedback.with_previous_summary(summary),
            None => feedback,
        })
    }
}

/// Formatter for handing feedback to code generation.
#[derive(Debug, Clone)]
pub struct FeedbackFormatter {
    /// Maximum number of CI log lines to include (tail).
    pub max_log_lines: usize,
}

impl Default for FeedbackFormatter {
    fn default() -> Self {
        Self { max_log_lines: 50 }
    }
}

impl FeedbackFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_log_lines(mut self, max: usize) -> Self {
        self.max_log_lines = max;
        self
    }

    /// Render feedback as plain-text sections
    pub fn format(&self, feedback: &Feedback) -> String {
        let mut parts = vec![format!(
            "Iteration {} feedback - please fix the issues and push again:\n",
            feedback.iteration
        )];

        if let Some(summary) = &feedback.previous_summary {
            parts.push(format!("PREVIOUS CHANGE:\n{}\n", summary));
        }

        if let Some(ci) = &feedback.ci {
            if !ci.failed_checks.is_empty() {
                parts.push("FAILED CI CHECKS:".to_string());
                for check in &ci.failed_checks {
                    match &check.summary {
                        Some(summary) => parts.push(format!("- {}: {}", check.name, summary)),
                        None => parts.push(format!("- {}: failed", check.name)),
                    }
                }
                parts.push(String::new());
            }

            if !ci.conflicting_paths.is_empty() {
                parts.push("MERGE CONFLICTS:".to_string());
                for path in &ci.conflicting_paths {
                    parts.push(format!("- {}", path));
                }
                parts.push(String::new());
            }

            let logs = tail_lines(&ci.logs, self.max_log_lines);
            if !logs.is_empty() {
                parts.push(format!("CI LOGS:\n{}\n", logs));
            }
        }

        if let Some(review) = &feedback.review {
            if !review.summary.is_empty() {
                parts.push(format!("REVIEW SUMMARY:\n{}\n", review.summary));
            }

            if !review.comments.is_empty() {
                parts.push("ISSUES TO FIX:".to_string());
                let mut comments: Vec<_> = review.comments.iter().collect();
                comments.sort_by_key(|c| c.severity);
                for c in comments {
                    let mut line = format!("- [{}] {}", c.severity, c.description);
                    if let Some(file) = &c.file {
                        match c.line {
                            Some(n) => line.push_str(&format!(" (file: {}:{})", file, n)),
                            None => line.push_str(&format!(" (file: {})", file)),
                        }
                    }
                    if let Some(suggestion) = &c.suggestion {
                        line.push_str(&format!("\n  Suggestion: {}", suggestion));
                    }
                    parts.push(line);
                }
                parts.push(String::new());
            }
        }

        parts.join("\n").trim_end().to_string()
    }
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max {
        return lines.join("\n");
    }
    let skipped = lines.len() - max;
    format!("... ({} lines omitted)\n{}", skipped, lines[skipped..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::{Change, FailedCheck, ReviewComment, Severity};
    use crate::domain::state::{Action, CycleState};
    use chrono::Utc;

    fn record(outcome: Outcome) -> HistoryRecord {
        HistoryRecord {
            at: Utc::now(),
            state: CycleState::PrCreated,
            action: Action::TriggerCi,
            outcome,
            next_state: CycleState::CiFailed,
            iteration: 0,
            feedback: None,
        }
    }

    #[test]
    fn test_from_history_picks_latest_negative_result() {
        let history = vec![
            record(Outcome::success(Payload::Generated(Change {
                diff: "d".into(),
                summary: "first try".into(),
            }))),
            record(Outcome::success(Payload::Ci(CiReport::fail(
                "old",
                vec![FailedCheck::new("old-check")],
            )))),
            record(Outcome::retryable("pending")),
            record(Outcome::success(Payload::Ci(CiReport::fail(
                "new",
                vec![FailedCheck::new("unit-tests")],
            )))),
        ];

        let feedback = Feedback::from_history(&history, 1).unwrap();
        assert_eq!(feedback.source, FeedbackSource::Ci);
        assert_eq!(feedback.iteration, 1);
        assert_eq!(feedback.ci.unwrap().failed_checks[0].name, "unit-tests");
        assert_eq!(feedback.previous_summary.as_deref(), Some("first try"));
    }

    #[test]
    fn test_from_history_ignores_passing_results() {
        let history = vec![
            record(Outcome::success(Payload::Ci(CiReport::pass()))),
            record(Outcome::success(Payload::Review(ReviewReport::approved()))),
        ];
        assert!(Feedback::from_history(&history, 1).is_none());
    }

    #[test]
    fn test_format_ci_sections() {
        let report = CiReport::fail(
            "line1\nline2",
            vec![FailedCheck {
                name: "unit-tests".into(),
                summary: Some("2 failed".into()),
            }],
        )
        .with_conflicts(vec!["src/lib.rs".into()]);
        let text = FeedbackFormatter::new().format(&Feedback::from_ci(2, report));

        assert!(text.starts_with("Iteration 2 feedback"));
        assert!(text.contains("FAILED CI CHECKS:\n- unit-tests: 2 failed"));
        assert!(text.contains("MERGE CONFLICTS:\n- src/lib.rs"));
        assert!(text.contains("CI LOGS:\nline1\nline2"));
        assert!(!text.contains("REVIEW SUMMARY"));
    }

    #[test]
    fn test_format_review_sorts_by_severity() {
        let report = ReviewReport::changes_requested(
            "Needs work",
            vec![
                ReviewComment::new(Severity::Minor, "rename var"),
                ReviewComment::new(Severity::Critical, "sql injection")
                    .at("src/db.rs", Some(12))
                    .with_suggestion("use bound parameters"),
            ],
        );
        let text = FeedbackFormatter::new().format(&Feedback::from_review(1, report));

        assert!(text.contains("REVIEW SUMMARY:\nNeeds work"));
        let critical = text.find("[CRITICAL] sql injection (file: src/db.rs:12)").unwrap();
        let minor = text.find("[MINOR] rename var").unwrap();
        assert!(critical < minor);
        assert!(text.contains("  Suggestion: use bound parameters"));
    }

    #[test]
    fn test_tail_lines_truncates() {
        let logs = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let out = tail_lines(&logs, 3);
        assert_eq!(out, "... (7 lines omitted)\n8\n9\n10");
        assert_eq!(tail_lines("a\nb", 3), "a\nb");
    }
}
