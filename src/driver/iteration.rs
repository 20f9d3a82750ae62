//! Iteration controller: one remediation attempt per loop-back.
//!
//! Builds feedback from the latest CI failure or review, waits out the cooldown and
//! re-invokes code generation. The existing PR then receives the change through
//! ApplyFix and CI re-runs; both are ordinary table actions the driver takes next.

use std::time::Duration;

use super::executor::{ActionExecutor, Attempt, Checkpoint, Invocation, renewing};
use crate::cancel::Cancellation;
use crate::domain::{Action, Feedback, FeedbackFormatter};
use crate::error::{CyclrError, Result};
use crate::machine::LifecycleMachine;

#[derive(Debug, Clone)]
pub struct IterationController {
    cooldown: Duration,
    formatter: FeedbackFormatter,
}

impl IterationController {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            formatter: FeedbackFormatter::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: FeedbackFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Feedback for the next iteration.
    ///
    /// Fails unless the cycle sits in a loop-back source with iterations left.
    pub fn plan(&self, machine: &LifecycleMachine) -> Result<Feedback> {
        let cycle = machine.cycle();
        if !cycle.state().is_loop_back_source() {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} cannot loop back from {}",
                cycle.issue_id(),
                cycle.state()
            )));
        }
        if cycle.iteration() >= cycle.max_iterations() {
            return Err(CyclrError::InvariantViolation(format!(
                "cycle {} has no iterations left ({}/{})",
                cycle.issue_id(),
                cycle.iteration(),
                cycle.max_iterations()
            )));
        }

        Feedback::from_history(cycle.history(), cycle.iteration() + 1).ok_or_else(|| {
            CyclrError::InvariantViolation(format!(
                "cycle {} is {} but history holds no CI failure or review",
                cycle.issue_id(),
                cycle.state()
            ))
        })
    }

    pub fn render(&self, feedback: &Feedback) -> String {
        self.formatter.format(feedback)
    }

    /// Run one remediation attempt: cooldown, then GenerateCode with feedback
    pub async fn remediate(
        &self,
        executor: &ActionExecutor,
        machine: &mut LifecycleMachine,
        cancel: &Cancellation,
        checkpoint: &mut dyn Checkpoint,
    ) -> Result<Attempt> {
        let feedback = self.plan(machine)?;
        log::info!(
            "{}: starting iteration {}/{} from {}",
            machine.cycle().issue_id(),
            feedback.iteration,
            machine.cycle().max_iterations(),
            machine.state()
        );

        if let Some(reason) = renewing(checkpoint, cancel.sleep(self.cooldown)).await? {
            return Ok(Attempt::Cancelled { reason, attempts: 0 });
        }

        let rendered = self.render(&feedback);
        let invocation = Invocation::remediation(feedback, rendered);
        executor
            .execute(machine, Action::GenerateCode, &invocation, cancel, checkpoint)
            .await
    }
}
