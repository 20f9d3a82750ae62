//! Scripted in-memory collaborator backend.
//!
//! Every role pops its next canned response from a queue and falls back to a
//! default (success) when the queue is empty. Calls are recorded for inspection.
//! PR creation is idempotent per issue, like a real host's "ensure PR exists".

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::types::*;
use super::{CiRunner, CodeGenerator, PullRequestHost, Reviewer};

/// A recorded collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCall {
    Generate {
        issue_id: String,
        iteration: u32,
        feedback: Option<String>,
    },
    CreatePullRequest {
        issue_id: String,
    },
    ApplyFix {
        pr_id: String,
        iteration: u32,
    },
    ClosePullRequest {
        pr_id: String,
    },
    TriggerCi {
        pr_id: String,
    },
    RequestReview {
        pr_id: String,
    },
}

#[derive(Default)]
struct Script {
    generations: VecDeque<CollabResult<RawGeneration>>,
    pull_requests: VecDeque<CollabResult<RawPullRequest>>,
    fixes: VecDeque<CollabResult<RawAck>>,
    closes: VecDeque<CollabResult<RawAck>>,
    ci: VecDeque<CollabResult<RawCiStatus>>,
    reviews: VecDeque<CollabResult<RawReview>>,
    ci_default: Option<CollabResult<RawCiStatus>>,
    review_default: Option<CollabResult<RawReview>>,
    ci_delay: Option<Duration>,
    open_prs: HashMap<String, String>,
    next_pr: u32,
    calls: Vec<ScriptedCall>,
    generation_requests: Vec<GenerationRequest>,
    comments: Vec<CommentRequest>,
}

/// In-memory collaborator backend for tests and dry runs
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_generation(&self, result: CollabResult<RawGeneration>) {
        self.script().generations.push_back(result);
    }

    pub fn push_pull_request(&self, result: CollabResult<RawPullRequest>) {
        self.script().pull_requests.push_back(result);
    }

    pub fn push_fix(&self, result: CollabResult<RawAck>) {
        self.script().fixes.push_back(result);
    }

    pub fn push_close(&self, result: CollabResult<RawAck>) {
        self.script().closes.push_back(result);
    }

    pub fn push_ci(&self, result: CollabResult<RawCiStatus>) {
        self.script().ci.push_back(result);
    }

    pub fn push_review(&self, result: CollabResult<RawReview>) {
        self.script().reviews.push_back(result);
    }

    /// Response for every CI call once the queue is drained
    pub fn set_ci_default(&self, result: CollabResult<RawCiStatus>) {
        self.script().ci_default = Some(result);
    }

    /// Response for every review call once the queue is drained
    pub fn set_review_default(&self, result: CollabResult<RawReview>) {
        self.script().review_default = Some(result);
    }

    /// Make every CI call take this long
    pub fn set_ci_delay(&self, delay: Duration) {
        self.script().ci_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.script().calls.clone()
    }

    /// Every generation request received, in order
    pub fn generation_requests(&self) -> Vec<GenerationRequest> {
        self.script().generation_requests.clone()
    }

    /// Comments posted on pull requests. Not counted as calls.
    pub fn comments(&self) -> Vec<CommentRequest> {
        self.script().comments.clone()
    }

    fn count(&self, pred: impl Fn(&ScriptedCall) -> bool) -> usize {
        self.script().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn generate_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::Generate { .. }))
    }

    pub fn pull_request_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::CreatePullRequest { .. }))
    }

    pub fn fix_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::ApplyFix { .. }))
    }

    pub fn ci_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::TriggerCi { .. }))
    }

    pub fn review_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::RequestReview { .. }))
    }

    pub fn close_calls(&self) -> usize {
        self.count(|c| matches!(c, ScriptedCall::ClosePullRequest { .. }))
    }

    /// PR currently open for an issue
    pub fn open_pull_request(&self, issue_id: &str) -> Option<String> {
        self.script().open_prs.get(issue_id).cloned()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<RawGeneration> {
        let mut script = self.script();
        script.calls.push(ScriptedCall::Generate {
            issue_id: request.issue_id.clone(),
            iteration: request.iteration,
            feedback: request.feedback.clone(),
        });
        script.generation_requests.push(request.clone());
        script.generations.pop_front().unwrap_or_else(|| {
            Ok(RawGeneration {
                diff: Some(format!("+change for {} (iteration {})", request.issue_id, request.iteration)),
                summary: Some(format!("{}: {}", request.issue_id, request.title)),
            })
        })
    }
}

#[async_trait]
impl PullRequestHost for ScriptedBackend {
    async fn create_pull_request(&self, request: &PullRequestRequest) -> CollabResult<RawPullRequest> {
        let mut script = self.script();
        script.calls.push(ScriptedCall::CreatePullRequest {
            issue_id: request.issue_id.clone(),
        });
        if let Some(result) = script.pull_requests.pop_front() {
            return result;
        }
        if let Some(existing) = script.open_prs.get(&request.issue_id) {
            return Ok(RawPullRequest {
                pr_id: Some(existing.clone()),
                url: None,
            });
        }
        script.next_pr += 1;
        let pr_id = script.next_pr.to_string();
        script.open_prs.insert(request.issue_id.clone(), pr_id.clone());
        Ok(RawPullRequest {
            pr_id: Some(pr_id),
            url: None,
        })
    }

    async fn apply_fix(&self, request: &FixRequest) -> CollabResult<RawAck> {
        let mut script = self.script();
        script.calls.push(ScriptedCall::ApplyFix {
            pr_id: request.pr_id.clone(),
            iteration: request.iteration,
        });
        script.fixes.pop_front().unwrap_or_else(|| Ok(RawAck::ok()))
    }

    async fn close_pull_request(&self, request: &CloseRequest) -> CollabResult<RawAck> {
        let mut script = self.script();
        script.calls.push(ScriptedCall::ClosePullRequest {
            pr_id: request.pr_id.clone(),
        });
        let result = script.closes.pop_front().unwrap_or_else(|| Ok(RawAck::ok()));
        if result.is_ok() {
            script.open_prs.remove(&request.issue_id);
        }
        result
    }

    async fn post_comment(&self, request: &CommentRequest) -> CollabResult<RawAck> {
        self.script().comments.push(request.clone());
        Ok(RawAck::ok())
    }
}

#[async_trait]
impl CiRunner for ScriptedBackend {
    async fn trigger_ci(&self, request: &PullRequestRef) -> CollabResult<RawCiStatus> {
        let (delay, result) = {
            let mut script = self.script();
            script.calls.push(ScriptedCall::TriggerCi {
                pr_id: request.pr_id.clone(),
            });
            let result = script
                .ci
                .pop_front()
                .or_else(|| script.ci_default.clone())
                .unwrap_or_else(|| Ok(RawCiStatus::with_status("pass")));
            (script.ci_delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl Reviewer for ScriptedBackend {
    async fn request_review(&self, request: &PullRequestRef) -> CollabResult<RawReview> {
        let mut script = self.script();
        script.calls.push(ScriptedCall::RequestReview {
            pr_id: request.pr_id.clone(),
        });
        script
            .reviews
            .pop_front()
            .or_else(|| script.review_default.clone())
            .unwrap_or_else(|| Ok(RawReview::with_verdict("approved")))
    }
}
