//! Action executor: one action against the collaborators, under the retry policy.

use std::time::Duration;

use crate::cancel::Cancellation;
use crate::classify::{
    classify_ci, classify_close, classify_error, classify_fix, classify_generation,
    classify_pull_request, classify_review,
};
use crate::collab::{
    CloseRequest, CollaboratorError, Collaborators, CommentKind, CommentRequest, FixRequest,
    GenerationRequest, PullRequestRef, PullRequestRequest,
};
use crate::domain::{
    Action, Change, CycleState, Feedback, IssueContext, IssueCycle, Outcome, Payload, comment,
};
use crate::error::{CyclrError, Result};
use crate::machine::LifecycleMachine;
use crate::retry::RetryPolicy;

/// Persists the cycle after every applied outcome and keeps the claim on it alive
/// while the executor waits.
///
/// Any `FnMut(&IssueCycle) -> Result<()>` closure is a checkpoint that never renews.
pub trait Checkpoint: Send {
    fn commit(&mut self, cycle: &IssueCycle) -> Result<()>;

    /// How often `renew` must run while a call or backoff is in flight
    fn renew_every(&self) -> Option<Duration> {
        None
    }

    fn renew(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> Checkpoint for F
where
    F: FnMut(&IssueCycle) -> Result<()> + Send,
{
    fn commit(&mut self, cycle: &IssueCycle) -> Result<()> {
        self(cycle)
    }
}

/// Await `work`, renewing the checkpoint's claim on its schedule until `work` resolves.
///
/// A failed renewal drops `work` and returns the error.
pub async fn renewing<F: Future>(checkpoint: &mut dyn Checkpoint, work: F) -> Result<F::Output> {
    let Some(every) = checkpoint.renew_every() else {
        return Ok(work.await);
    };
    let every = every.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Ok(output),
            _ = ticker.tick() => checkpoint.renew()?,
        }
    }
}

/// Extra input for an action beyond what the cycle itself carries
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Remediation feedback for a loop-back GenerateCode
    pub feedback: Option<Feedback>,
    /// The same feedback rendered for the generator
    pub rendered_feedback: Option<String>,
    /// Operator reason for ClosePullRequest
    pub close_reason: Option<String>,
}

impl Invocation {
    pub fn remediation(feedback: Feedback, rendered: String) -> Self {
        Self {
            feedback: Some(feedback),
            rendered_feedback: Some(rendered),
            close_reason: None,
        }
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Self {
            close_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Result of executing one action to a non-retryable outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The final outcome was applied; `attempts` counts every collaborator call
    Applied { state: CycleState, attempts: u32 },
    /// Cancelled while backing off; the retryable attempts so far are recorded
    Cancelled { reason: String, attempts: u32 },
}

impl Attempt {
    pub fn attempts(&self) -> u32 {
        match self {
            Attempt::Applied { attempts, .. } | Attempt::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// Executes actions through the collaborators and feeds classified outcomes to the machine
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    collaborators: Collaborators,
    retry: RetryPolicy,
    action_timeout: Duration,
    post_comments: bool,
}

impl ActionExecutor {
    pub fn new(collaborators: Collaborators, retry: RetryPolicy, action_timeout: Duration) -> Self {
        Self {
            collaborators,
            retry,
            action_timeout,
            post_comments: false,
        }
    }

    /// Post CI summaries and reviews onto the pull request as comments
    pub fn with_comments(mut self, enabled: bool) -> Self {
        self.post_comments = enabled;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `action` until it yields a non-retryable outcome, the retry ceiling is hit,
    /// or the cancellation fires during backoff.
    ///
    /// Every attempt is applied to the machine and committed.
    pub async fn execute(
        &self,
        machine: &mut LifecycleMachine,
        action: Action,
        invocation: &Invocation,
        cancel: &Cancellation,
        checkpoint: &mut dyn Checkpoint,
    ) -> Result<Attempt> {
        let mut retries = 0u32;

        loop {
            let call = self.invoke(machine.cycle(), action, invocation);
            let outcome = renewing(checkpoint, call).await??;
            let attempts = retries + 1;

            if !outcome.is_retryable() {
                if self.post_comments {
                    self.announce(machine.cycle(), &outcome).await;
                }
                let state = match (action, invocation.close_reason.as_deref()) {
                    (Action::ClosePullRequest, Some(reason)) => machine.close(outcome, reason)?,
                    _ => machine.apply(action, outcome, invocation.feedback.clone())?,
                };
                checkpoint.commit(machine.cycle())?;
                return Ok(Attempt::Applied { state, attempts });
            }

            let (reason, retry_after) = match &outcome {
                Outcome::Retryable { reason, retry_after } => (reason.clone(), *retry_after),
                _ => (outcome.describe(), None),
            };

            if !self.retry.allows_retry(retries) {
                log::warn!(
                    "{} on {} still retryable after {} attempts: {}",
                    action,
                    machine.cycle().issue_id(),
                    attempts,
                    reason
                );
                let state = match (action, invocation.close_reason.as_deref()) {
                    // An operator close still ends as Closed, whatever the host did
                    (Action::ClosePullRequest, Some(close_reason)) => {
                        let outcome = Outcome::fatal(format!(
                            "close still retryable after {} attempts: {}",
                            attempts, reason
                        ));
                        machine.close(outcome, close_reason)?
                    }
                    _ => machine.give_up(action, attempts, &reason)?,
                };
                checkpoint.commit(machine.cycle())?;
                return Ok(Attempt::Applied { state, attempts });
            }

            machine.apply(action, outcome, invocation.feedback.clone())?;
            checkpoint.commit(machine.cycle())?;

            let delay = self.retry.delay_for(retries, retry_after);
            if let Some(reason) = renewing(checkpoint, cancel.sleep(delay)).await? {
                return Ok(Attempt::Cancelled { reason, attempts });
            }
            retries += 1;
        }
    }

    /// One collaborator call, classified. Never touches the machine.
    pub async fn invoke(&self, cycle: &IssueCycle, action: Action, invocation: &Invocation) -> Result<Outcome> {
        log::info!("{}: {} (iteration {})", cycle.issue_id(), action, cycle.iteration());

        let call = self.call(cycle, action, invocation);
        match tokio::time::timeout(self.action_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(classify_error(CollaboratorError::Timeout(self.action_timeout))),
        }
    }

    /// Post a definitive CI or review result onto the PR. Failures are logged and
    /// never reach the cycle.
    async fn announce(&self, cycle: &IssueCycle, outcome: &Outcome) {
        let (kind, body) = match outcome {
            Outcome::Success(Payload::Ci(report)) => (CommentKind::CiSummary, comment::ci_summary(report)),
            Outcome::Success(Payload::Review(report)) => (CommentKind::Review, comment::review(report)),
            _ => return,
        };
        let Some(pr_id) = cycle.pr_id() else {
            return;
        };

        let request = CommentRequest {
            issue_id: cycle.issue_id().to_string(),
            pr_id: pr_id.to_string(),
            kind,
            body,
        };
        let post = self.collaborators.pull_requests.post_comment(&request);
        match tokio::time::timeout(self.action_timeout, post).await {
            Ok(Ok(_)) => log::debug!("{}: posted {} comment on PR {}", request.issue_id, kind, pr_id),
            Ok(Err(e)) => log::warn!("{}: failed to post {} comment: {}", request.issue_id, kind, e),
            Err(_) => log::warn!("{}: posting {} comment timed out", request.issue_id, kind),
        }
    }

    async fn call(&self, cycle: &IssueCycle, action: Action, invocation: &Invocation) -> Result<Outcome> {
        let issue = cycle.issue();
        let c = &self.collaborators;

        let outcome = match action {
            Action::GenerateCode => {
                let request = GenerationRequest {
                    issue_id: issue.id.clone(),
                    title: issue.title.clone(),
                    description: issue.description.clone(),
                    context: IssueContext::parse(&issue.title, &issue.description),
                    iteration: invocation
                        .feedback
                        .as_ref()
                        .map_or(cycle.iteration(), |f| f.iteration),
                    feedback: invocation.rendered_feedback.clone(),
                    feedback_detail: invocation.feedback.clone(),
                };
                classify_generation(c.generator.generate(&request).await)
            }
            Action::CreatePullRequest => {
                let context = IssueContext::parse(&issue.title, &issue.description);
                let request = PullRequestRequest {
                    issue_id: issue.id.clone(),
                    title: context.pr_title(&issue.title),
                    change: require_change(cycle)?,
                };
                classify_pull_request(c.pull_requests.create_pull_request(&request).await)
            }
            Action::ApplyFix => {
                let request = FixRequest {
                    issue_id: issue.id.clone(),
                    pr_id: require_pr(cycle, action)?,
                    iteration: cycle.iteration(),
                    change: require_change(cycle)?,
                };
                classify_fix(c.pull_requests.apply_fix(&request).await)
            }
            Action::TriggerCi => {
                let request = pr_ref(cycle, action)?;
                classify_ci(c.ci.trigger_ci(&request).await)
            }
            Action::RequestReview => {
                let request = pr_ref(cycle, action)?;
                classify_review(c.reviewer.request_review(&request).await)
            }
            Action::ClosePullRequest => {
                let request = CloseRequest {
                    issue_id: issue.id.clone(),
                    pr_id: require_pr(cycle, action)?,
                    reason: invocation.close_reason.clone().unwrap_or_default(),
                };
                classify_close(c.pull_requests.close_pull_request(&request).await)
            }
        };

        log::debug!("{}: {} -> {}", issue.id, action, outcome.describe());
        Ok(outcome)
    }
}

fn require_change(cycle: &IssueCycle) -> Result<Change> {
    cycle.change().cloned().ok_or_else(|| {
        CyclrError::InvariantViolation(format!("cycle {} has no generated change", cycle.issue_id()))
    })
}

fn require_pr(cycle: &IssueCycle, action: Action) -> Result<String> {
    cycle.pr_id().map(str::to_string).ok_or_else(|| {
        CyclrError::InvariantViolation(format!("{} without a pull request on {}", action, cycle.issue_id()))
    })
}

fn pr_ref(cycle: &IssueCycle, action: Action) -> Result<PullRequestRef> {
    Ok(PullRequestRef {
        issue_id: cycle.issue_id().to_string(),
        pr_id: require_pr(cycle, action)?,
    })
}
