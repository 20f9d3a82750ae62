//! Cycle driver: runs a lifecycle machine to convergence.
//!
//! Each entry point acquires the cycle's lease under a fresh per-drive token, loads or
//! creates the cycle and steps the machine until its goal is met, committing after
//! every applied outcome. The lease is renewed while collaborator calls, backoff and
//! cooldown are in flight, and released on every exit path.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::DriverConfig;
use super::executor::{ActionExecutor, Attempt, Checkpoint, Invocation};
use super::iteration::IterationController;
use crate::cancel::Cancellation;
use crate::collab::Collaborators;
use crate::domain::{AbandonReason, Action, CycleSummary, Issue, IssueCycle, Verdict};
use crate::error::{CyclrError, Result};
use crate::id::{generate_lease_token, generate_owner_id};
use crate::machine::{LifecycleMachine, Step};
use crate::storage::{CycleFilter, CycleStore, Lease};

/// Where a drive stops short of a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Goal {
    /// Run until Merged or Abandoned
    Verdict,
    /// Stop once a pull request exists
    PullRequest,
    /// Stop at the first CI failure or change request instead of looping back
    Review,
}

impl Goal {
    fn reached(self, cycle: &IssueCycle) -> bool {
        match self {
            Goal::Verdict => false,
            Goal::PullRequest => cycle.pr_id().is_some(),
            Goal::Review => cycle.state().is_loop_back_source(),
        }
    }
}

pub struct CycleDriver {
    store: Arc<dyn CycleStore>,
    executor: ActionExecutor,
    controller: IterationController,
    config: DriverConfig,
    owner: String,
}

impl CycleDriver {
    pub fn new(store: Arc<dyn CycleStore>, collaborators: Collaborators, config: DriverConfig) -> Self {
        let executor = ActionExecutor::new(collaborators, config.retry.clone(), config.action_timeout)
            .with_comments(config.post_comments);
        let controller = IterationController::new(config.iteration_cooldown);
        Self {
            store,
            executor,
            controller,
            config,
            owner: generate_owner_id(),
        }
    }

    /// Use a fixed lease owner id instead of a generated one
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Drive an issue to a verdict.
    ///
    /// Resumes the stored cycle if there is one; a terminal cycle returns its stored
    /// verdict without executing anything.
    pub async fn run_cycle(&self, issue: Issue, max_iterations: u32, cancel: &Cancellation) -> Result<Verdict> {
        let issue_id = issue.id.clone();
        let cycle = self.drive(&issue_id, Some((issue, max_iterations)), Goal::Verdict, cancel).await?;
        cycle.verdict().cloned().ok_or_else(|| {
            CyclrError::InvariantViolation(format!("cycle {} stopped without a verdict", issue_id))
        })
    }

    /// Drive an already stored cycle to a verdict
    pub async fn resume(&self, issue_id: &str, cancel: &Cancellation) -> Result<Verdict> {
        let cycle = self.drive(issue_id, None, Goal::Verdict, cancel).await?;
        cycle.verdict().cloned().ok_or_else(|| {
            CyclrError::InvariantViolation(format!("cycle {} stopped without a verdict", issue_id))
        })
    }

    /// Generate code and open the pull request, then stop
    pub async fn process_issue(
        &self,
        issue: Issue,
        max_iterations: u32,
        cancel: &Cancellation,
    ) -> Result<CycleSummary> {
        let issue_id = issue.id.clone();
        let cycle = self
            .drive(&issue_id, Some((issue, max_iterations)), Goal::PullRequest, cancel)
            .await?;
        Ok(cycle.summary())
    }

    /// Run CI and review on an existing cycle without looping back
    pub async fn review(&self, issue_id: &str, cancel: &Cancellation) -> Result<CycleSummary> {
        let cycle = self.drive(issue_id, None, Goal::Review, cancel).await?;
        Ok(cycle.summary())
    }

    /// Operator close: close the PR if there is one, then abandon with a Closed reason
    pub async fn close(&self, issue_id: &str, reason: &str) -> Result<Verdict> {
        let mut lease = self.acquire(issue_id)?;
        let result = self.close_leased(issue_id, reason, &mut lease).await;
        self.release(&lease);
        result
    }

    pub fn status(&self, issue_id: &str) -> Result<IssueCycle> {
        self.store
            .load(issue_id)?
            .ok_or_else(|| CyclrError::CycleNotFound(issue_id.to_string()))
    }

    pub fn list(&self, filter: &CycleFilter) -> Result<Vec<CycleSummary>> {
        Ok(self.store.list(filter)?.iter().map(IssueCycle::summary).collect())
    }

    /// Ask whichever driver holds the cycle to abandon it at the next check
    pub fn request_cancel(&self, issue_id: &str, reason: &str) -> Result<bool> {
        let requested = self.store.request_cancel(issue_id, reason)?;
        if requested {
            log::info!("{}: cancel requested ({})", issue_id, reason);
        }
        Ok(requested)
    }

    async fn drive(
        &self,
        issue_id: &str,
        create: Option<(Issue, u32)>,
        goal: Goal,
        cancel: &Cancellation,
    ) -> Result<IssueCycle> {
        let mut lease = self.acquire(issue_id)?;

        let result = self.drive_leased(issue_id, create, goal, cancel, &mut lease).await;
        self.release(&lease);

        match &result {
            Ok(cycle) => log::info!("{}: stopped in {} ({})", issue_id, cycle.state(), describe(cycle)),
            Err(e) => log::error!("{}: driver failed: {}", issue_id, e),
        }
        result
    }

    async fn drive_leased(
        &self,
        issue_id: &str,
        create: Option<(Issue, u32)>,
        goal: Goal,
        cancel: &Cancellation,
        lease: &mut Lease,
    ) -> Result<IssueCycle> {
        let cycle = match self.store.load(issue_id)? {
            Some(cycle) => cycle,
            None => match create {
                Some((issue, max_iterations)) => IssueCycle::new(issue, max_iterations),
                None => return Err(CyclrError::CycleNotFound(issue_id.to_string())),
            },
        };
        let mut machine = LifecycleMachine::restore(cycle)?;
        if machine.cycle().is_terminal() {
            return Ok(machine.into_cycle());
        }

        let mut keeper = self.keeper(lease);
        keeper.commit(machine.cycle())?;

        // Deadline and budget span the whole cycle, across resumes
        let cancel = match self.config.deadline {
            Some(deadline) => cancel.clone().with_timeout(remaining(machine.cycle(), deadline)),
            None => cancel.clone(),
        };

        while !machine.cycle().is_terminal() && !goal.reached(machine.cycle()) {
            let requested = match cancel.reason() {
                Some(reason) => Some(reason),
                None => self.store.cancel_request(issue_id)?,
            };
            if let Some(reason) = requested {
                machine.abandon(AbandonReason::Cancelled { reason })?;
                keeper.commit(machine.cycle())?;
                break;
            }

            let actions = actions_taken(machine.cycle());
            if self.config.max_actions.is_some_and(|max| actions >= max) {
                machine.exhaust(AbandonReason::BudgetExhausted { actions })?;
                keeper.commit(machine.cycle())?;
                break;
            }

            let attempt = match machine.next_step()? {
                Step::Finished(_) => break,
                Step::Exhausted => {
                    let iterations = machine.cycle().iteration();
                    machine.exhaust(AbandonReason::IterationsExhausted { iterations })?;
                    keeper.commit(machine.cycle())?;
                    break;
                }
                Step::LoopBack => {
                    self.controller
                        .remediate(&self.executor, &mut machine, &cancel, &mut keeper)
                        .await?
                }
                Step::Execute(action) => {
                    self.executor
                        .execute(&mut machine, action, &Invocation::default(), &cancel, &mut keeper)
                        .await?
                }
            };

            if let Attempt::Cancelled { reason, .. } = attempt {
                machine.abandon(AbandonReason::Cancelled { reason })?;
                keeper.commit(machine.cycle())?;
                break;
            }
        }

        Ok(machine.into_cycle())
    }

    async fn close_leased(&self, issue_id: &str, reason: &str, lease: &mut Lease) -> Result<Verdict> {
        let cycle = self
            .store
            .load(issue_id)?
            .ok_or_else(|| CyclrError::CycleNotFound(issue_id.to_string()))?;
        let mut machine = LifecycleMachine::restore(cycle)?;
        if let Some(verdict) = machine.cycle().verdict() {
            return Ok(verdict.clone());
        }

        let mut keeper = self.keeper(lease);
        if machine.cycle().pr_id().is_some() {
            self.executor
                .execute(
                    &mut machine,
                    Action::ClosePullRequest,
                    &Invocation::close(reason),
                    &Cancellation::never(),
                    &mut keeper,
                )
                .await?;
        } else {
            machine.abandon(AbandonReason::Closed {
                reason: reason.to_string(),
            })?;
            keeper.commit(machine.cycle())?;
        }

        log::info!("{}: closed ({})", issue_id, reason);
        machine.cycle().verdict().cloned().ok_or_else(|| {
            CyclrError::InvariantViolation(format!("cycle {} closed without a verdict", issue_id))
        })
    }

    /// Claim the cycle for one drive
    fn acquire(&self, issue_id: &str) -> Result<Lease> {
        let token = generate_lease_token(&self.owner);
        let lease = self.store.acquire(issue_id, &token, self.config.lease_ttl, Utc::now())?;
        log::debug!("{}: lease acquired by {}", issue_id, token);
        Ok(lease)
    }

    fn keeper<'a>(&'a self, lease: &'a mut Lease) -> LeaseKeeper<'a> {
        LeaseKeeper {
            store: self.store.as_ref(),
            lease,
            ttl: self.config.lease_ttl,
        }
    }

    fn release(&self, lease: &Lease) {
        if let Err(e) = self.store.release(lease) {
            log::warn!("{}: failed to release lease: {}", lease.issue_id, e);
        }
    }
}

/// Writes the cycle under the drive's lease and keeps the lease alive while the
/// executor waits
struct LeaseKeeper<'a> {
    store: &'a dyn CycleStore,
    lease: &'a mut Lease,
    ttl: Duration,
}

impl Checkpoint for LeaseKeeper<'_> {
    fn commit(&mut self, cycle: &IssueCycle) -> Result<()> {
        let renewed = self.store.commit(cycle, self.lease, self.ttl, Utc::now())?;
        *self.lease = renewed;
        Ok(())
    }

    fn renew_every(&self) -> Option<Duration> {
        Some(self.ttl / 3)
    }

    fn renew(&mut self) -> Result<()> {
        let renewed = self.store.renew(self.lease, self.ttl, Utc::now())?;
        log::trace!("{}: lease renewed until {}", renewed.issue_id, renewed.expires_at);
        *self.lease = renewed;
        Ok(())
    }
}

/// Collaborator calls made so far; every attempt leaves a history record
fn actions_taken(cycle: &IssueCycle) -> u32 {
    u32::try_from(cycle.history().len()).unwrap_or(u32::MAX)
}

/// Time left of `deadline`, counted from the cycle's creation
fn remaining(cycle: &IssueCycle, deadline: Duration) -> Duration {
    let elapsed = (Utc::now() - cycle.created_at()).to_std().unwrap_or_default();
    deadline.saturating_sub(elapsed)
}

fn describe(cycle: &IssueCycle) -> String {
    match cycle.verdict() {
        Some(verdict) => verdict.to_string(),
        None => format!("iteration {}/{}", cycle.iteration(), cycle.max_iterations()),
    }
}

impl std::fmt::Debug for CycleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleDriver")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
