//! Pure state transition function.
//!
//! `transition` takes the current state, the action that was executed and its
//! classified outcome, and returns the next state. It has NO side effects: counters,
//! history and verdicts are the lifecycle machine's business.

use crate::domain::{Action, CiVerdict, CycleState, Outcome, Payload, ReviewVerdict};
use crate::error::{CyclrError, Result};

/// What a loop-back source resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Another remediation attempt is allowed
    LoopBack,
    /// The iteration ceiling is reached
    Exhausted,
}

/// Returns true if `action` may be issued from `state`
pub fn is_legal(state: CycleState, action: Action) -> bool {
    use CycleState::*;

    match action {
        Action::GenerateCode => matches!(state, Opened | CiFailed | ChangesRequested),
        Action::CreatePullRequest | Action::ApplyFix => state == CodeGenerated,
        Action::TriggerCi => matches!(state, PrCreated | CiPending),
        Action::RequestReview => state == CiPassed,
        Action::ClosePullRequest => !state.is_terminal(),
    }
}

/// Returns true if executing `action` from `state` is a loop-back (consumes an iteration)
pub fn is_loop_back(state: CycleState, action: Action) -> bool {
    action == Action::GenerateCode && state.is_loop_back_source()
}

/// Pure state transition function.
///
/// Illegal actions, payloads that do not belong to the action, and anything issued
/// from a terminal state are invariant violations.
pub fn transition(state: CycleState, action: Action, outcome: &Outcome) -> Result<CycleState> {
    use CycleState::*;

    if state.is_terminal() {
        return Err(CyclrError::InvariantViolation(format!(
            "{} issued from terminal state {}",
            action, state
        )));
    }
    if !is_legal(state, action) {
        return Err(CyclrError::InvariantViolation(format!(
            "{} is not legal from {}",
            action, state
        )));
    }

    let payload = match outcome {
        // Retryable: caller retries the same action
        Outcome::Retryable { .. } => return Ok(state),
        Outcome::Fatal(_) => return Ok(Abandoned),
        Outcome::Success(payload) => payload,
    };

    if payload.produced_by() != action {
        return Err(CyclrError::InvariantViolation(format!(
            "{} returned a {} payload",
            action,
            payload.produced_by()
        )));
    }

    let next = match (state, payload) {
        (Opened | CiFailed | ChangesRequested, Payload::Generated(_)) => CodeGenerated,
        (CodeGenerated, Payload::PullRequest { .. }) => PrCreated,
        (CodeGenerated, Payload::FixApplied) => CiPending,
        (PrCreated | CiPending, Payload::Ci(report)) => match report.verdict {
            CiVerdict::Pass => CiPassed,
            CiVerdict::Fail => CiFailed,
        },
        (CiPassed, Payload::Review(report)) => match report.verdict {
            ReviewVerdict::Approved => Merged,
            ReviewVerdict::ChangesRequested => ChangesRequested,
        },
        (_, Payload::PullRequestClosed) => Abandoned,
        (state, payload) => {
            return Err(CyclrError::InvariantViolation(format!(
                "no transition from {} on {}",
                state,
                payload.describe()
            )));
        }
    };

    Ok(next)
}

/// Resolve a loop-back source against the iteration ceiling.
///
/// Returns None for states that are not loop-back sources.
pub fn resolve(state: CycleState, iteration: u32, max_iterations: u32) -> Option<Resolution> {
    if !state.is_loop_back_source() {
        return None;
    }
    if iteration < max_iterations {
        Some(Resolution::LoopBack)
    } else {
        Some(Resolution::Exhausted)
    }
}

/// Static action table: the one action each transient state issues.
///
/// CodeGenerated issues CreatePullRequest on the first pass and ApplyFix once a PR
/// exists. Loop-back sources and terminal states have no table action.
pub fn next_action(state: CycleState, has_pr: bool) -> Option<Action> {
    use CycleState::*;

    match state {
        Opened => Some(Action::GenerateCode),
        CodeGenerated if has_pr => Some(Action::ApplyFix),
        CodeGenerated => Some(Action::CreatePullRequest),
        PrCreated | CiPending => Some(Action::TriggerCi),
        CiPassed => Some(Action::RequestReview),
        CiFailed | ChangesRequested | Merged | Abandoned => None,
    }
}
