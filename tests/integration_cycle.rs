//! Full-cycle integration tests
//!
//! Drives cycles end to end through the scripted collaborator backend, against
//! both the SQLite and the in-memory store.

use chrono::{DateTime, Utc};
use cyclr::cancel::{Cancellation, cancellation};
use cyclr::collab::{
    CollaboratorError, Collaborators, RawCiStatus, RawGeneration, RawReview, RawReviewComment,
    ScriptedBackend, ScriptedCall,
};
use cyclr::domain::{AbandonReason, Action, CycleState, Issue, IssueCycle, Verdict};
use cyclr::driver::{CycleDriver, DriverConfig};
use cyclr::error::{CyclrError, Result};
use cyclr::retry::RetryPolicy;
use cyclr::storage::{CycleFilter, CycleStore, Lease, MemoryCycleStore, SqliteCycleStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn fast_config() -> DriverConfig {
    DriverConfig {
        retry: RetryPolicy::new(6, Duration::ZERO, Duration::ZERO),
        iteration_cooldown: Duration::ZERO,
        ..Default::default()
    }
}

fn sqlite_driver(backend: &Arc<ScriptedBackend>) -> Result<(TempDir, Arc<SqliteCycleStore>, CycleDriver)> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(SqliteCycleStore::open_at(temp_dir.path())?);
    let driver = CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), fast_config());
    Ok((temp_dir, store, driver))
}

fn memory_driver(backend: &Arc<ScriptedBackend>) -> (Arc<MemoryCycleStore>, CycleDriver) {
    let store = Arc::new(MemoryCycleStore::new());
    let driver = CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), fast_config());
    (store, driver)
}

fn abc1() -> Issue {
    Issue::new("ABC-1", "Fix login", "Login crashes when the password is empty")
}

/// CI fails forever: three remediation attempts, then the Exhausted verdict.
#[tokio::test]
async fn test_ci_never_passes_exhausts_iterations() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_ci_default(Ok(RawCiStatus {
        status: Some("fail".into()),
        logs: Some("test_empty_password ... FAILED".into()),
        ..Default::default()
    }));
    let (_dir, store, driver) = sqlite_driver(&backend)?;

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Exhausted);
    assert_eq!(backend.ci_calls(), 4);
    assert_eq!(backend.generate_calls(), 4);
    assert_eq!(backend.pull_request_calls(), 1);
    assert_eq!(backend.fix_calls(), 3);

    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(cycle.state(), CycleState::Abandoned);
    assert_eq!(cycle.iteration(), 3);
    assert_eq!(cycle.history().len(), 3 + 3 * 3);
    assert_eq!(
        cycle.abandon_reason(),
        Some(&AbandonReason::IterationsExhausted { iterations: 3 })
    );
    assert!(store.lease("ABC-1")?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_first_pass_merge() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let (_dir, store, driver) = sqlite_driver(&backend)?;

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(cycle.iteration(), 0);
    let actions: Vec<Action> = cycle.history().iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            Action::GenerateCode,
            Action::CreatePullRequest,
            Action::TriggerCi,
            Action::RequestReview
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_reviews_then_approval() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    for _ in 0..3 {
        backend.push_review(Err(CollaboratorError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        }));
    }
    let (store, driver) = memory_driver(&backend);

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    assert_eq!(backend.review_calls(), 4);
    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(cycle.iteration(), 0);
    assert_eq!(cycle.history().len(), 7);
    let retried: Vec<_> = cycle
        .history()
        .iter()
        .filter(|r| r.outcome.is_retryable())
        .collect();
    assert_eq!(retried.len(), 3);
    assert!(retried.iter().all(|r| r.state == CycleState::CiPassed && r.next_state == CycleState::CiPassed));
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_ci_runs() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_ci_delay(Duration::from_millis(200));
    let (_dir, store, driver) = sqlite_driver(&backend)?;
    let (handle, cancel) = cancellation();

    let (verdict, _) = tokio::join!(driver.run_cycle(abc1(), 3, &cancel), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel("operator abort");
    });

    let expected = Verdict::Abandoned(AbandonReason::Cancelled {
        reason: "operator abort".into(),
    });
    assert_eq!(verdict?, expected);
    // The in-flight CI call finished; nothing ran after it
    assert_eq!(backend.ci_calls(), 1);
    assert_eq!(backend.review_calls(), 0);

    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(cycle.state(), CycleState::Abandoned);
    assert_eq!(cycle.verdict(), Some(&expected));
    Ok(())
}

#[tokio::test]
async fn test_lease_held_by_another_driver() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let (_dir, store, driver) = sqlite_driver(&backend)?;
    store.acquire("ABC-1", "drv-other", Duration::from_secs(300), Utc::now())?;

    let err = driver.run_cycle(abc1(), 3, &Cancellation::never()).await.unwrap_err();

    assert!(matches!(err, CyclrError::LeaseHeld { ref owner, .. } if owner == "drv-other"));
    assert!(backend.calls().is_empty());
    Ok(())
}

/// A driver dies holding the lease after the PR was opened. Once the lease
/// expires, a new driver resumes without regenerating code or reopening the PR.
#[tokio::test]
async fn test_resume_after_crash() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let (_dir, store, driver) = sqlite_driver(&backend)?;

    let summary = driver.process_issue(abc1(), 3, &Cancellation::never()).await?;
    assert_eq!(summary.state, CycleState::PrCreated);
    store.acquire(
        "ABC-1",
        "drv-dead",
        Duration::from_secs(60),
        Utc::now() - chrono::Duration::minutes(10),
    )?;

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    assert_eq!(backend.generate_calls(), 1);
    assert_eq!(backend.pull_request_calls(), 1);
    assert_eq!(backend.ci_calls(), 1);
    assert_eq!(store.load("ABC-1")?.expect("cycle persisted").history().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_independent_cycles() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_ci(Ok(RawCiStatus::with_status("fail")));
    let (_dir, store, driver) = sqlite_driver(&backend)?;
    let cancel = Cancellation::never();

    let issues = ["ABC-1", "ABC-2", "ABC-3"];
    let runs = issues
        .iter()
        .map(|id| driver.run_cycle(Issue::new(*id, "t", "d"), 3, &cancel));
    let verdicts = futures::future::join_all(runs).await;

    for verdict in verdicts {
        assert_eq!(verdict?, Verdict::Merged);
    }
    let mut prs: Vec<String> = issues
        .iter()
        .filter_map(|id| store.load(id).ok().flatten())
        .filter_map(|c| c.pr_id().map(str::to_string))
        .collect();
    prs.sort();
    prs.dedup();
    assert_eq!(prs.len(), 3);
    assert_eq!(backend.pull_request_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_retry_ceiling_abandons() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_ci_default(Ok(RawCiStatus::with_status("pending")));
    let store = Arc::new(MemoryCycleStore::new());
    let config = DriverConfig {
        retry: RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
        ..fast_config()
    };
    let driver = CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), config);

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    match verdict {
        Verdict::Abandoned(AbandonReason::RetriesExhausted { action, attempts, .. }) => {
            assert_eq!(action, Action::TriggerCi);
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(backend.ci_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_empty_diff_is_fatal() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_generation(Ok(RawGeneration {
        diff: Some(String::new()),
        summary: Some("nothing".into()),
    }));
    let (store, driver) = memory_driver(&backend);

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert!(matches!(
        verdict,
        Verdict::Abandoned(AbandonReason::Fatal {
            action: Action::GenerateCode,
            ..
        })
    ));
    assert_eq!(backend.pull_request_calls(), 0);
    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert!(cycle.last_error().is_some());
    Ok(())
}

/// Review feedback reaches the generator and the fix lands on the existing PR
#[tokio::test]
async fn test_review_feedback_drives_fix() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_review(Ok(RawReview {
        verdict: Some("approved".into()),
        summary: Some("looks fine but".into()),
        comments: vec![RawReviewComment {
            severity: Some("critical".into()),
            description: "SQL built by string concatenation".into(),
            file: Some("src/db.rs".into()),
            line: Some(42),
            suggestion: Some("use bound parameters".into()),
        }],
    }));
    let (store, driver) = memory_driver(&backend);

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    let feedback = backend
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ScriptedCall::Generate {
                iteration: 1,
                feedback,
                ..
            } => feedback,
            _ => None,
        })
        .expect("remediation received feedback");
    assert!(feedback.contains("ISSUES TO FIX"));
    assert!(feedback.contains("[CRITICAL] SQL built by string concatenation"));
    assert!(feedback.contains("use bound parameters"));

    let pr = backend.open_pull_request("ABC-1").expect("PR still open");
    assert!(backend.calls().contains(&ScriptedCall::ApplyFix { pr_id: pr, iteration: 1 }));
    assert_eq!(backend.pull_request_calls(), 1);
    assert_eq!(store.load("ABC-1")?.expect("cycle persisted").iteration(), 1);
    Ok(())
}

#[tokio::test]
async fn test_merge_conflict_loops_back() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_ci(Ok(RawCiStatus {
        mergeable: Some(false),
        conflicting_paths: vec!["src/auth.rs".into()],
        ..Default::default()
    }));
    let (_store, driver) = memory_driver(&backend);

    let verdict = driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    let feedback = backend.calls().into_iter().find_map(|call| match call {
        ScriptedCall::Generate {
            iteration: 1,
            feedback,
            ..
        } => feedback,
        _ => None,
    });
    let feedback = feedback.expect("remediation received feedback");
    assert!(feedback.contains("MERGE CONFLICTS"));
    assert!(feedback.contains("src/auth.rs"));
    Ok(())
}

#[tokio::test]
async fn test_operator_close_and_status() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let (_dir, _store, driver) = sqlite_driver(&backend)?;

    driver.process_issue(abc1(), 3, &Cancellation::never()).await?;
    let verdict = driver.close("ABC-1", "duplicate of ABC-7").await?;

    assert_eq!(
        verdict,
        Verdict::Abandoned(AbandonReason::Closed {
            reason: "duplicate of ABC-7".into()
        })
    );
    let cycle = driver.status("ABC-1")?;
    assert!(cycle.is_terminal());
    assert_eq!(cycle.history().last().map(|r| r.action), Some(Action::ClosePullRequest));

    // Terminal cycles never execute further actions
    let calls = backend.calls().len();
    assert_eq!(driver.run_cycle(abc1(), 3, &Cancellation::never()).await?, verdict);
    assert_eq!(backend.calls().len(), calls);
    Ok(())
}

/// A call outlasting the lease TTL keeps the lease: a second driver arriving
/// mid-call is refused instead of running CI again.
#[tokio::test]
async fn test_lease_renewed_during_long_ci_call() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_ci_delay(Duration::from_millis(400));
    let temp_dir = TempDir::new()?;
    let store = Arc::new(SqliteCycleStore::open_at(temp_dir.path())?);
    let config = DriverConfig {
        lease_ttl: Duration::from_millis(150),
        action_timeout: Duration::from_millis(600),
        ..fast_config()
    };
    let first = CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), config.clone())
        .with_owner("drv-a");
    let second =
        CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), config).with_owner("drv-b");
    let cancel = Cancellation::never();

    let (a, b) = tokio::join!(first.run_cycle(abc1(), 3, &cancel), async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        second.run_cycle(abc1(), 3, &cancel).await
    });

    assert_eq!(a?, Verdict::Merged);
    assert!(matches!(b, Err(CyclrError::LeaseHeld { ref owner, .. }) if owner.starts_with("drv-a#")));
    assert_eq!(backend.ci_calls(), 1);
    assert_eq!(backend.generate_calls(), 1);
    assert!(store.lease("ABC-1")?.is_none());
    Ok(())
}

/// Two overlapping drives of one issue through the same driver: only one runs.
#[tokio::test]
async fn test_overlapping_drives_of_one_issue() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_ci_delay(Duration::from_millis(100));
    let (_dir, store, driver) = sqlite_driver(&backend)?;
    let cancel = Cancellation::never();

    let (first, second) = tokio::join!(
        driver.run_cycle(abc1(), 3, &cancel),
        driver.run_cycle(abc1(), 3, &cancel)
    );

    assert_eq!(first?, Verdict::Merged);
    assert!(matches!(second, Err(CyclrError::LeaseHeld { .. })));
    assert_eq!(backend.ci_calls(), 1);
    assert_eq!(backend.pull_request_calls(), 1);
    assert_eq!(store.load("ABC-1")?.expect("cycle persisted").history().len(), 4);
    Ok(())
}

/// Store that fails the first commit of a cycle in PrCreated, as if the process
/// died right after the host opened the pull request
struct FailingCommitStore {
    inner: MemoryCycleStore,
    failed: AtomicBool,
}

impl FailingCommitStore {
    fn new() -> Self {
        Self {
            inner: MemoryCycleStore::new(),
            failed: AtomicBool::new(false),
        }
    }
}

impl CycleStore for FailingCommitStore {
    fn acquire(&self, issue_id: &str, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        self.inner.acquire(issue_id, owner, ttl, now)
    }

    fn load(&self, issue_id: &str) -> Result<Option<IssueCycle>> {
        self.inner.load(issue_id)
    }

    fn commit(&self, cycle: &IssueCycle, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        if cycle.state() == CycleState::PrCreated && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(CyclrError::Storage("disk full".into()));
        }
        self.inner.commit(cycle, lease, ttl, now)
    }

    fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        self.inner.renew(lease, ttl, now)
    }

    fn release(&self, lease: &Lease) -> Result<()> {
        self.inner.release(lease)
    }

    fn lease(&self, issue_id: &str) -> Result<Option<Lease>> {
        self.inner.lease(issue_id)
    }

    fn list(&self, filter: &CycleFilter) -> Result<Vec<IssueCycle>> {
        self.inner.list(filter)
    }

    fn request_cancel(&self, issue_id: &str, reason: &str) -> Result<bool> {
        self.inner.request_cancel(issue_id, reason)
    }

    fn cancel_request(&self, issue_id: &str) -> Result<Option<String>> {
        self.inner.cancel_request(issue_id)
    }
}

/// The PR opens but the commit recording it fails. Resuming asks the host again
/// and gets the same PR back; history holds one CreatePullRequest record.
#[tokio::test]
async fn test_resume_after_failed_commit_reuses_pull_request() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let store = Arc::new(FailingCommitStore::new());
    let driver = CycleDriver::new(store.clone(), Collaborators::from_backend(backend.clone()), fast_config());

    let err = driver.run_cycle(abc1(), 3, &Cancellation::never()).await.unwrap_err();
    assert!(matches!(err, CyclrError::Storage(_)));
    let pr = backend.open_pull_request("ABC-1").expect("host opened the PR");
    let stored = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(stored.state(), CycleState::CodeGenerated);
    assert!(store.lease("ABC-1")?.is_none());

    let verdict = driver.resume("ABC-1", &Cancellation::never()).await?;

    assert_eq!(verdict, Verdict::Merged);
    assert_eq!(backend.pull_request_calls(), 2);
    assert_eq!(backend.generate_calls(), 1);
    let cycle = store.load("ABC-1")?.expect("cycle persisted");
    assert_eq!(cycle.pr_id(), Some(pr.as_str()));
    assert_eq!(backend.open_pull_request("ABC-1"), Some(pr));
    let created = cycle
        .history()
        .iter()
        .filter(|r| r.action == Action::CreatePullRequest)
        .count();
    assert_eq!(created, 1);
    let states: Vec<CycleState> = cycle.history().iter().map(|r| r.next_state).collect();
    assert_eq!(
        states,
        vec![
            CycleState::CodeGenerated,
            CycleState::PrCreated,
            CycleState::CiPassed,
            CycleState::Merged
        ]
    );
    Ok(())
}

/// CI and review results are posted on the PR, without counting as actions
#[tokio::test]
async fn test_results_posted_as_comments() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let (store, driver) = memory_driver(&backend);

    driver.run_cycle(abc1(), 3, &Cancellation::never()).await?;

    let comments = backend.comments();
    assert_eq!(comments.len(), 2);
    assert!(comments[0].body.starts_with("## CI Status Summary"));
    assert!(comments[1].body.contains("APPROVED"));
    let pr = store.load("ABC-1")?.and_then(|c| c.pr_id().map(str::to_string));
    assert!(comments.iter().all(|c| Some(&c.pr_id) == pr.as_ref()));
    assert_eq!(store.load("ABC-1")?.expect("cycle persisted").history().len(), 4);
    Ok(())
}
