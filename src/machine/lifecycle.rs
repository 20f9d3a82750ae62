//! The lifecycle machine: canonical owner of one IssueCycle.
//!
//! Wraps the pure transition table with everything stateful: the iteration counter,
//! the append-only history, the PR identifier, the last error and the verdict.

use chrono::Utc;

use super::transition::{Resolution, is_loop_back, next_action, resolve, transition};
use crate::domain::{
    AbandonReason, Action, CycleState, Feedback, HistoryRecord, IssueCycle, Outcome, Payload,
    Verdict,
};
use crate::error::{CyclrError, Result};

/// What the driver should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Execute the table action for the current state
    Execute(Action),
    /// Start a remediation attempt
    LoopBack,
    /// Iteration ceiling reached in a loop-back source
    Exhausted,
    /// Terminal; nothing left to do
    Finished(Verdict),
}

/// Owns one IssueCycle and is the only thing allowed to mutate it
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    cycle: IssueCycle,
}

impl LifecycleMachine {
    pub fn new(cycle: IssueCycle) -> Self {
        Self { cycle }
    }

    /// Restore a machine from a persisted cycle, checking its invariants
    pub fn restore(cycle: IssueCycle) -> Result<Self> {
        cycle.validate()?;
        Ok(Self { cycle })
    }

    pub fn cycle(&self) -> &IssueCycle {
        &self.cycle
    }

    pub fn into_cycle(self) -> IssueCycle {
        self.cycle
    }

    pub fn state(&self) -> CycleState {
        self.cycle.state
    }

    /// Decide what happens next
    pub fn next_step(&self) -> Result<Step> {
        let cycle = &self.cycle;

        if cycle.state.is_terminal() {
            let verdict = cycle.verdict.clone().ok_or_else(|| {
                CyclrError::InvariantViolation(format!(
                    "cycle {} is {} without a verdict",
                    cycle.issue.id, cycle.state
                ))
            })?;
            return Ok(Step::Finished(verdict));
        }

        if let Some(resolution) = resolve(cycle.state, cycle.iteration, cycle.max_iterations) {
            return Ok(match resolution {
                Resolution::LoopBack => Step::LoopBack,
                Resolution::Exhausted => Step::Exhausted,
            });
        }

        match next_action(cycle.state, cycle.pr_id.is_some()) {
            Some(action) => Ok(Step::Execute(action)),
            None => Err(CyclrError::InvariantViolation(format!(
                "no action for state {}",
                cycle.state
            ))),
        }
    }

    /// Apply a classified outcome of `action`.
    ///
    /// Records the action in history and returns the new state. `feedback` is only
    /// meaningful for a loop-back GenerateCode.
    pub fn apply(
        &mut self,
        action: Action,
        outcome: Outcome,
        feedback: Option<Feedback>,
    ) -> Result<CycleState> {
        self.apply_inner(action, outcome, feedback, None)
    }

    /// Record a final retryable outcome that exhausted the retry ceiling.
    ///
    /// The outcome is converted to Fatal and the cycle abandons with a
    /// RetriesExhausted reason.
    pub fn give_up(&mut self, action: Action, attempts: u32, reason: &str) -> Result<CycleState> {
        let abandon = AbandonReason::RetriesExhausted {
            action,
            attempts,
            reason: reason.to_string(),
        };
        let outcome = Outcome::fatal(abandon.to_string());
        self.apply_inner(action, outcome, None, Some(abandon))
    }

    /// Record the outcome of an operator-initiated ClosePullRequest
    pub fn close(&mut self, outcome: Outcome, reason: &str) -> Result<CycleState> {
        let abandon = AbandonReason::Closed {
            reason: reason.to_string(),
        };
        self.apply_inner(Action::ClosePullRequest, outcome, None, Some(abandon))
    }

    fn apply_inner(
        &mut self,
        action: Action,
        outcome: Outcome,
        feedback: Option<Feedback>,
        abandon_override: Option<AbandonReason>,
    ) -> Result<CycleState> {
        let from = self.cycle.state;
        let loop_back = is_loop_back(from, action);

        // Single hard stop: no loop-back once the ceiling is reached
        if loop_back && self.cycle.iteration >= self.cycle.max_iterations {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} already used {} of {} iterations",
                self.cycle.issue.id, self.cycle.iteration, self.cycle.max_iterations
            )));
        }
        match action {
            Action::CreatePullRequest if self.cycle.pr_id.is_some() => {
                return Err(CyclrError::InvariantViolation(format!(
                    "cycle {} already has a pull request",
                    self.cycle.issue.id
                )));
            }
            Action::ApplyFix | Action::ClosePullRequest if self.cycle.pr_id.is_none() => {
                return Err(CyclrError::InvariantViolation(format!(
                    "{} without a pull request on {}",
                    action, self.cycle.issue.id
                )));
            }
            _ => {}
        }

        let next = transition(from, action, &outcome)?;

        match &outcome {
            Outcome::Success(payload) => {
                match payload {
                    Payload::Generated(change) => self.cycle.change = Some(change.clone()),
                    Payload::PullRequest { pr_id } => self.cycle.pr_id = Some(pr_id.clone()),
                    _ => {}
                }
                self.cycle.last_error = None;
            }
            Outcome::Retryable { reason, .. } => {
                self.cycle.last_error = Some(reason.clone());
            }
            Outcome::Fatal(reason) => {
                self.cycle.last_error = Some(reason.clone());
            }
        }

        if loop_back && next == CycleState::CodeGenerated {
            self.cycle.iteration += 1;
        }

        if next == CycleState::Abandoned {
            let reason = abandon_override.unwrap_or_else(|| match (&outcome, action) {
                (_, Action::ClosePullRequest) => AbandonReason::Closed {
                    reason: outcome.describe(),
                },
                (Outcome::Fatal(reason), _) => AbandonReason::Fatal {
                    action,
                    reason: reason.clone(),
                },
                _ => AbandonReason::Fatal {
                    action,
                    reason: outcome.describe(),
                },
            });
            self.cycle.verdict = Some(Verdict::Abandoned(reason.clone()));
            self.cycle.abandon_reason = Some(reason);
        } else if next == CycleState::Merged {
            self.cycle.verdict = Some(Verdict::Merged);
        }

        self.cycle.history.push(HistoryRecord {
            at: Utc::now(),
            state: from,
            action,
            outcome,
            next_state: next,
            iteration: self.cycle.iteration,
            feedback: if action == Action::GenerateCode { feedback } else { None },
        });
        self.cycle.state = next;
        self.cycle.touch();

        log::debug!(
            "cycle {}: {} --{}--> {} (iteration {}/{})",
            self.cycle.issue.id,
            from,
            action,
            next,
            self.cycle.iteration,
            self.cycle.max_iterations
        );

        Ok(next)
    }

    /// Force the Exhausted verdict and the final Abandoned state
    pub fn exhaust(&mut self, reason: AbandonReason) -> Result<Verdict> {
        self.finish(reason, Verdict::Exhausted)
    }

    /// Abandon without executing an action (cancellation, operator close without a PR)
    pub fn abandon(&mut self, reason: AbandonReason) -> Result<Verdict> {
        let verdict = Verdict::Abandoned(reason.clone());
        self.finish(reason, verdict)
    }

    fn finish(&mut self, reason: AbandonReason, verdict: Verdict) -> Result<Verdict> {
        if self.cycle.state.is_terminal() {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} is already {}",
                self.cycle.issue.id, self.cycle.state
            )));
        }
        log::info!(
            "cycle {}: {} -> abandoned ({})",
            self.cycle.issue.id,
            self.cycle.state,
            reason
        );
        self.cycle.state = CycleState::Abandoned;
        self.cycle.abandon_reason = Some(reason);
        self.cycle.verdict = Some(verdict.clone());
        self.cycle.touch();
        Ok(verdict)
    }
}
