//! Markdown comments posted on pull requests for CI and review results.

use super::outcome::{CiReport, CiVerdict, ReviewReport, ReviewVerdict, Severity};

/// Longest check summary quoted in a CI comment
const MAX_CHECK_SUMMARY: usize = 200;

pub fn ci_summary(report: &CiReport) -> String {
    let mut lines = vec!["## CI Status Summary".to_string(), String::new()];

    for check in &report.failed_checks {
        lines.push(format!("- ❌ **{}**: failure", check.name));
        if let Some(summary) = check.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            let summary: String = summary.chars().take(MAX_CHECK_SUMMARY).collect();
            lines.push(format!("  > {}", summary.replace('\n', " ")));
        }
    }
    if !report.conflicting_paths.is_empty() {
        lines.push(String::new());
        lines.push("**Merge conflicts:**".to_string());
        for path in &report.conflicting_paths {
            lines.push(format!("- `{}`", path));
        }
    }

    lines.push(String::new());
    lines.push(match report.verdict {
        CiVerdict::Pass => "✅ All checks passed!".to_string(),
        CiVerdict::Fail => "❌ Some checks failed. Please review and fix.".to_string(),
    });
    lines.join("\n")
}

pub fn review(report: &ReviewReport) -> String {
    let mut lines = vec!["# Automated Code Review".to_string(), String::new()];

    if !report.summary.trim().is_empty() {
        lines.push("## Summary".to_string());
        lines.push(String::new());
        lines.push(report.summary.trim().to_string());
        lines.push(String::new());
    }

    lines.push(match report.verdict {
        ReviewVerdict::Approved => "**Status:** ✅ APPROVED".to_string(),
        ReviewVerdict::ChangesRequested => "**Status:** 🔄 CHANGES REQUESTED".to_string(),
    });

    if !report.comments.is_empty() {
        lines.push(String::new());
        lines.push("## Issues Found".to_string());
        let mut comments: Vec<_> = report.comments.iter().collect();
        comments.sort_by_key(|c| c.severity);
        for comment in comments {
            lines.push(String::new());
            lines.push(format!(
                "### {} [{}] {}",
                icon(comment.severity),
                comment.severity,
                comment.description
            ));
            if let Some(file) = &comment.file {
                lines.push(format!("- **File:** `{}`", file));
            }
            if let Some(line) = comment.line {
                lines.push(format!("- **Line:** {}", line));
            }
            if let Some(suggestion) = &comment.suggestion {
                lines.push(format!("- **Suggestion:** {}", suggestion));
            }
        }
    }

    lines.join("\n")
}

fn icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::Major => "🟠",
        Severity::Minor => "🟡",
        Severity::Info => "⚪",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailedCheck, ReviewComment};

    #[test]
    fn test_ci_summary_pass() {
        let body = ci_summary(&CiReport::pass());
        assert!(body.starts_with("## CI Status Summary"));
        assert!(body.ends_with("✅ All checks passed!"));
    }

    #[test]
    fn test_ci_summary_failure_lists_checks_and_conflicts() {
        let mut check = FailedCheck::new("unit-tests");
        check.summary = Some("x".repeat(500));
        let report = CiReport::fail("logs", vec![check]).with_conflicts(vec!["src/lib.rs".into()]);

        let body = ci_summary(&report);
        assert!(body.contains("- ❌ **unit-tests**: failure"));
        assert!(body.contains(&format!("  > {}\n", "x".repeat(MAX_CHECK_SUMMARY))));
        assert!(body.contains("- `src/lib.rs`"));
        assert!(body.ends_with("Please review and fix."));
    }

    #[test]
    fn test_review_orders_by_severity() {
        let report = ReviewReport::changes_requested(
            "Needs work",
            vec![
                ReviewComment::new(Severity::Minor, "naming"),
                ReviewComment::new(Severity::Critical, "sql injection")
                    .at("src/db.rs", Some(42))
                    .with_suggestion("use bound parameters"),
            ],
        );

        let body = review(&report);
        assert!(body.contains("**Status:** 🔄 CHANGES REQUESTED"));
        let critical = body.find("[CRITICAL] sql injection").unwrap();
        let minor = body.find("[MINOR] naming").unwrap();
        assert!(critical < minor);
        assert!(body.contains("- **File:** `src/db.rs`\n- **Line:** 42\n- **Suggestion:** use bound parameters"));
    }

    #[test]
    fn test_review_approved_without_summary() {
        let body = review(&ReviewReport::approved());
        assert_eq!(body, "# Automated Code Review\n\n**Status:** ✅ APPROVED");
    }
}
