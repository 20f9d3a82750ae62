//! Outcome classifier.
//!
//! Turns raw collaborator results into {Success, Retryable, Fatal}. Authoritative
//! negative answers (failing CI, merge conflicts, requested changes) are Success
//! payloads that carry structured feedback; only transport trouble is Retryable and
//! only impossible or rejected responses are Fatal.

use crate::collab::{
    CollabResult, CollaboratorError, RawAck, RawCheck, RawCiStatus, RawGeneration, RawPullRequest,
    RawReview,
};
use crate::domain::{
    Change, CiReport, FailedCheck, Outcome, Payload, ReviewComment, ReviewReport, ReviewVerdict,
    Severity,
};

/// Check conclusions that do not fail a run
const PASSING_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];

/// Classify a transport-level error
pub fn classify_error(err: CollaboratorError) -> Outcome {
    if err.is_retryable() {
        match err.retry_after() {
            Some(hint) => Outcome::retry_after(err.to_string(), hint),
            None => Outcome::retryable(err.to_string()),
        }
    } else {
        Outcome::fatal(err.to_string())
    }
}

pub fn classify_generation(result: CollabResult<RawGeneration>) -> Outcome {
    let raw = match result {
        Ok(raw) => raw,
        Err(err) => return classify_error(err),
    };
    let diff = match raw.diff {
        Some(diff) if !diff.trim().is_empty() => diff,
        _ => return Outcome::fatal("code generation returned an empty diff"),
    };
    let summary = raw
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "generated change".to_string());
    Outcome::success(Payload::Generated(Change { diff, summary }))
}

pub fn classify_pull_request(result: CollabResult<RawPullRequest>) -> Outcome {
    match result {
        Ok(RawPullRequest {
            pr_id: Some(pr_id), ..
        }) if !pr_id.trim().is_empty() => Outcome::success(Payload::PullRequest {
            pr_id: pr_id.trim().to_string(),
        }),
        Ok(_) => Outcome::fatal("pull request reported created without an identifier"),
        Err(err) => classify_error(err),
    }
}

fn classify_ack(result: CollabResult<RawAck>, payload: Payload, what: &str) -> Outcome {
    match result {
        Ok(RawAck {
            ok: Some(false),
            message,
        }) => Outcome::fatal(format!(
            "{} refused: {}",
            what,
            message.unwrap_or_else(|| "no reason given".to_string())
        )),
        Ok(_) => Outcome::success(payload),
        Err(err) => classify_error(err),
    }
}

pub fn classify_fix(result: CollabResult<RawAck>) -> Outcome {
    classify_ack(result, Payload::FixApplied, "apply fix")
}

pub fn classify_close(result: CollabResult<RawAck>) -> Outcome {
    classify_ack(result, Payload::PullRequestClosed, "close pull request")
}

fn is_completed(check: &RawCheck) -> bool {
    match check.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("completed") => true,
        Some(_) => false,
        // No status: trust a conclusion if there is one
        None => check.conclusion.is_some(),
    }
}

fn is_passing(check: &RawCheck) -> bool {
    check
        .conclusion
        .as_deref()
        .map(|c| PASSING_CONCLUSIONS.contains(&c.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn classify_ci(result: CollabResult<RawCiStatus>) -> Outcome {
    let raw = match result {
        Ok(raw) => raw,
        Err(err) => return classify_error(err),
    };
    let logs = raw.logs.unwrap_or_default();

    if raw.mergeable == Some(false) || !raw.conflicting_paths.is_empty() {
        return Outcome::success(Payload::Ci(
            CiReport::fail(logs, vec![FailedCheck::new("merge conflict")])
                .with_conflicts(raw.conflicting_paths),
        ));
    }

    if !raw.checks.is_empty() {
        let pending: Vec<&str> = raw
            .checks
            .iter()
            .filter(|c| !is_completed(c))
            .map(|c| c.name.as_str())
            .collect();
        if !pending.is_empty() {
            return Outcome::retryable(format!(
                "{} checks still running: {}",
                pending.len(),
                pending.join(", ")
            ));
        }

        let failed: Vec<FailedCheck> = raw
            .checks
            .iter()
            .filter(|c| !is_passing(c))
            .map(|c| FailedCheck {
                name: c.name.clone(),
                summary: c
                    .summary
                    .clone()
                    .or_else(|| c.conclusion.clone())
                    .or_else(|| Some("failed".to_string())),
            })
            .collect();

        return if failed.is_empty() {
            Outcome::success(Payload::Ci(CiReport {
                logs,
                ..CiReport::pass()
            }))
        } else {
            Outcome::success(Payload::Ci(CiReport::fail(logs, failed)))
        };
    }

    let status = raw.status.as_deref().map(|s| s.trim().to_ascii_lowercase());
    match status.as_deref() {
        // Nothing configured to run
        None => Outcome::success(Payload::Ci(CiReport::pass())),
        Some("pass" | "passed" | "success") => Outcome::success(Payload::Ci(CiReport {
            logs,
            ..CiReport::pass()
        })),
        Some("fail" | "failed" | "failure") => Outcome::success(Payload::Ci(CiReport::fail(logs, vec![]))),
        Some("pending" | "queued" | "in_progress" | "running") => {
            Outcome::retryable(format!("ci {}", status.as_deref().unwrap_or("pending")))
        }
        Some(other) => Outcome::fatal(format!("unknown ci status: {}", other)),
    }
}

pub fn classify_review(result: CollabResult<RawReview>) -> Outcome {
    let raw = match result {
        Ok(raw) => raw,
        Err(err) => return classify_error(err),
    };

    let comments: Vec<ReviewComment> = raw
        .comments
        .into_iter()
        .map(|c| ReviewComment {
            severity: c
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Info),
            description: c.description,
            file: c.file,
            line: c.line,
            suggestion: c.suggestion,
        })
        .collect();
    let has_critical = comments.iter().any(|c| c.severity == Severity::Critical);
    let has_blocking = comments.iter().any(|c| c.severity <= Severity::Major);
    let summary = raw.summary.unwrap_or_default();

    let verdict = match raw.verdict.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => return Outcome::fatal("review returned no verdict"),
        Some(v) => v,
    };
    let verdict = match verdict.replace('-', "_").as_str() {
        // A critical issue overrides an approval
        "approved" | "approve" if has_critical => ReviewVerdict::ChangesRequested,
        "approved" | "approve" => ReviewVerdict::Approved,
        "changes_requested" | "request_changes" => ReviewVerdict::ChangesRequested,
        "comment" | "commented" if has_blocking => ReviewVerdict::ChangesRequested,
        "comment" | "commented" => ReviewVerdict::Approved,
        "pending" | "in_progress" => return Outcome::retryable("review in progress"),
        other => return Outcome::fatal(format!("unknown review verdict: {}", other)),
    };

    Outcome::success(Payload::Review(ReviewReport {
        verdict,
        summary,
        comments,
    }))
}
