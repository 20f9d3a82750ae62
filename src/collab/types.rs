//! Request and raw response types exchanged with collaborators.
//!
//! Raw responses are deliberately loose (every field optional): deciding whether a
//! response is usable is the classifier's job, not the transport's.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Change, Feedback, IssueContext};
use std::fmt;

/// Transport-level collaborator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Work accepted but not finished yet (CI running, review in progress)
    #[error("Pending: {0}")]
    Pending(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CollaboratorError::RateLimited { .. })
    }

    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::RateLimited { .. } => true,
            CollaboratorError::Timeout(_) => true,
            CollaboratorError::Http { status, .. } => *status >= 500 || *status == 408,
            CollaboratorError::Network(_) => true,
            CollaboratorError::Pending(_) => true,
            CollaboratorError::Rejected(_) => false,
            CollaboratorError::Malformed(_) => false,
        }
    }

    /// Retry-after hint supplied by the collaborator
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CollaboratorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub issue_id: String,
    pub title: String,
    pub description: String,
    /// Task type, requirements, acceptance criteria and file references drawn from the issue
    pub context: IssueContext,
    /// 0 on the first pass, the iteration being started on a loop-back
    pub iteration: u32,
    /// Rendered feedback text, present only on loop-back
    pub feedback: Option<String>,
    /// Structured form of the same feedback
    pub feedback_detail: Option<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRequest {
    pub issue_id: String,
    pub title: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub issue_id: String,
    pub pr_id: String,
    pub iteration: u32,
    pub change: Change,
}

/// Identifies the PR a CI or review call refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub issue_id: String,
    pub pr_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub issue_id: String,
    pub pr_id: String,
    pub reason: String,
}

/// What a pull request comment reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    CiSummary,
    Review,
}

impl fmt::Display for CommentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentKind::CiSummary => f.write_str("ci summary"),
            CommentKind::Review => f.write_str("review"),
        }
    }
}

/// Markdown comment to post on a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRequest {
    pub issue_id: String,
    pub pr_id: String,
    pub kind: CommentKind,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGeneration {
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPullRequest {
    #[serde(default)]
    pub pr_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Acknowledgement for fire-and-confirm calls (apply fix, close PR)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAck {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RawAck {
    pub fn ok() -> Self {
        Self {
            ok: Some(true),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCheck {
    pub name: String,
    /// queued, in_progress, completed
    #[serde(default)]
    pub status: Option<String>,
    /// success, failure, neutral, skipped, cancelled, timed_out, ...
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl RawCheck {
    pub fn completed(name: impl Into<String>, conclusion: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Some("completed".into()),
            conclusion: Some(conclusion.into()),
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCiStatus {
    /// Overall status when the backend reports one: pass, fail, pending
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub checks: Vec<RawCheck>,
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub conflicting_paths: Vec<String>,
}

impl RawCiStatus {
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReviewComment {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReview {
    /// approved, changes_requested, comment, pending
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub comments: Vec<RawReviewComment>,
}

impl RawReview {
    pub fn with_verdict(verdict: impl Into<String>) -> Self {
        Self {
            verdict: Some(verdict.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CollaboratorError::RateLimited { retry_after: None }.is_retryable());
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CollaboratorError::Network("reset".into()).is_retryable());
        assert!(CollaboratorError::Pending("ci running".into()).is_retryable());
        assert!(
            CollaboratorError::Http {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            CollaboratorError::Http {
                status: 408,
                message: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(
            !CollaboratorError::Http {
                status: 404,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!CollaboratorError::Rejected("forbidden".into()).is_retryable());
        assert!(!CollaboratorError::Malformed("not json".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = CollaboratorError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(CollaboratorError::Network("x".into()).retry_after(), None);
    }

    #[test]
    fn test_raw_ci_status_parses_sparse_json() {
        let raw: RawCiStatus = serde_json::from_str(r#"{"status": "pass"}"#).unwrap();
        assert_eq!(raw.status.as_deref(), Some("pass"));
        assert!(raw.checks.is_empty());
        assert!(raw.mergeable.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = CollaboratorError::Http {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
