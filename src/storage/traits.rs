//! Storage trait definitions, leases and filter types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{CycleState, IssueCycle};
use crate::error::Result;

/// Time-bounded exclusive claim on one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub issue_id: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(issue_id: impl Into<String>, owner: impl Into<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            issue_id: issue_id.into(),
            owner: owner.into(),
            expires_at: expiry(now, ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `now + ttl`, saturating on absurd TTLs
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Filter for listing cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleFilter {
    pub state: Option<CycleState>,
    /// Only cycles that have not reached a terminal state
    pub active_only: bool,
}

impl CycleFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn state(state: CycleState) -> Self {
        Self {
            state: Some(state),
            active_only: false,
        }
    }

    pub fn active() -> Self {
        Self {
            state: None,
            active_only: true,
        }
    }

    pub fn matches(&self, cycle: &IssueCycle) -> bool {
        if self.state.is_some_and(|state| cycle.state() != state) {
            return false;
        }
        !(self.active_only && cycle.is_terminal())
    }
}

/// Durable cycle storage with leased exclusive access.
///
/// Implementations must be safe to share between drivers: acquire and commit are
/// atomic with respect to each other.
pub trait CycleStore: Send + Sync {
    /// Claim the cycle for `owner`. Succeeds if unclaimed, already ours, or the
    /// previous lease expired; otherwise `LeaseHeld`.
    fn acquire(&self, issue_id: &str, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Lease>;

    /// Load a committed cycle
    fn load(&self, issue_id: &str) -> Result<Option<IssueCycle>>;

    /// Persist the cycle and renew the lease. Fails with `LeaseLost` if the lease
    /// now belongs to someone else.
    fn commit(&self, cycle: &IssueCycle, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease>;

    /// Extend the lease without writing the cycle, for long collaborator calls.
    /// Fails with `LeaseLost` if the lease now belongs to someone else.
    fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease>;

    /// Give up the lease. Releasing a lease we no longer hold is a no-op.
    fn release(&self, lease: &Lease) -> Result<()>;

    /// Current lease on a cycle, expired or not
    fn lease(&self, issue_id: &str) -> Result<Option<Lease>>;

    /// Committed cycles matching the filter, most recently updated first
    fn list(&self, filter: &CycleFilter) -> Result<Vec<IssueCycle>>;

    /// Record an operator abort for an active cycle. Returns false if there is no
    /// such active cycle.
    fn request_cancel(&self, issue_id: &str, reason: &str) -> Result<bool>;

    /// Pending operator abort, if any
    fn cancel_request(&self, issue_id: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Issue;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = Lease::new("ABC-1", "drv", Duration::from_secs(10), now);
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Utc::now();
        assert_eq!(expiry(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_filter_matches() {
        let cycle = IssueCycle::new(Issue::new("A", "t", "d"), 3);
        assert!(CycleFilter::all().matches(&cycle));
        assert!(CycleFilter::active().matches(&cycle));
        assert!(CycleFilter::state(CycleState::Opened).matches(&cycle));
        assert!(!CycleFilter::state(CycleState::Merged).matches(&cycle));
    }
}
